use serde::{Deserialize, Serialize};

pub const MUL_OPERATOR: char = '*';
pub const DIV_OPERATOR: char = '/';

pub const DEFAULT_UNITS: &[&str] = &["cm", "ｍｍ", "ｍ", "円", "個"];

const MUL_GLYPHS: &[char] = &['×', '＊', '✕'];
const DIV_GLYPHS: &[char] = &['÷', '／'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemStatus {
    Unanswered,
    Correct,
    Incorrect,
}

impl ProblemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProblemStatus::Unanswered => "unanswered",
            ProblemStatus::Correct => "correct",
            ProblemStatus::Incorrect => "incorrect",
        }
    }
}

/// Answer comparison rules. Every correctness decision in the sidecar goes
/// through one `Grader`, so the unit list is the only thing that varies.
#[derive(Debug, Clone)]
pub struct Grader {
    // Longest first, so "ｍｍ" is removed before "ｍ" can split it.
    units: Vec<String>,
}

impl Default for Grader {
    fn default() -> Self {
        Self::with_units(DEFAULT_UNITS.iter().copied())
    }
}

impl Grader {
    pub fn with_units<I, S>(units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut units: Vec<String> = units
            .into_iter()
            .map(|u| u.as_ref().chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .filter(|u| !u.is_empty())
            .collect();
        units.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        units.dedup();
        Self { units }
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Canonical form used for comparison.
    ///
    /// One pass strips whitespace, folds fullwidth digits, strips unit
    /// tokens and canonicalizes the multiplication/division glyphs. Passes
    /// repeat until nothing changes: removing a unit can expose another one
    /// ("ccmm" -> "cm"), and a single pass would not be idempotent.
    pub fn normalize(&self, answer: &str) -> String {
        let mut current = self.normalize_pass(answer);
        loop {
            let next = self.normalize_pass(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn normalize_pass(&self, answer: &str) -> String {
        let mut out: String = answer
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(fold_fullwidth_digit)
            .collect();
        for unit in &self.units {
            if out.contains(unit.as_str()) {
                out = out.replace(unit.as_str(), "");
            }
        }
        out.chars()
            .map(|c| {
                if MUL_GLYPHS.contains(&c) {
                    MUL_OPERATOR
                } else if DIV_GLYPHS.contains(&c) {
                    DIV_OPERATOR
                } else {
                    c
                }
            })
            .collect()
    }

    /// Blank answers, including whitespace-only ones, are `Unanswered` even
    /// when the key normalizes to the same empty string. Otherwise the
    /// canonical forms decide.
    pub fn grade(&self, student_answer: &str, correct_answer: &str) -> ProblemStatus {
        if student_answer.trim().is_empty() {
            return ProblemStatus::Unanswered;
        }
        if self.normalize(student_answer) == self.normalize(correct_answer) {
            ProblemStatus::Correct
        } else {
            ProblemStatus::Incorrect
        }
    }
}

fn fold_fullwidth_digit(c: char) -> char {
    match c {
        '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
        _ => c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullwidth_digits_and_units_fold_to_ascii() {
        let g = Grader::default();
        assert_eq!(g.normalize("１０cm"), "10");
        assert_eq!(g.normalize("２５０円"), "250");
        assert_eq!(g.normalize("3 個"), "3");
        assert_eq!(g.normalize("１２ｍｍ"), "12");
        assert_eq!(g.normalize("７ｍ"), "7");
    }

    #[test]
    fn whitespace_including_ideographic_space_is_removed() {
        let g = Grader::default();
        assert_eq!(g.normalize(" 1\u{3000}2 \t3\n"), "123");
    }

    #[test]
    fn operator_glyphs_are_canonical() {
        let g = Grader::default();
        assert_eq!(g.normalize("3×4"), "3*4");
        assert_eq!(g.normalize("3＊4"), "3*4");
        assert_eq!(g.normalize("12÷4"), "12/4");
        assert_eq!(g.normalize("12／4"), "12/4");
    }

    #[test]
    fn normalize_is_idempotent_even_when_units_nest() {
        let g = Grader::default();
        let samples = [
            "ccmm",
            "１０cm",
            "c m",
            "ｍｍｍ",
            "3 × ４ 円",
            "",
            "   ",
            "あいう",
            "1/2",
            "ccm円m",
        ];
        for s in samples {
            let once = g.normalize(s);
            assert_eq!(g.normalize(&once), once, "not idempotent for {s:?}");
        }
        assert_eq!(g.normalize("ccmm"), "");
    }

    #[test]
    fn grade_scenarios() {
        let g = Grader::default();
        assert_eq!(g.grade("１０cm", "10"), ProblemStatus::Correct);
        assert_eq!(g.grade("", "10"), ProblemStatus::Unanswered);
        assert_eq!(g.grade("  ", "10"), ProblemStatus::Unanswered);
        assert_eq!(g.grade("11", "10"), ProblemStatus::Incorrect);
        assert_eq!(g.grade("3×4", "3*4"), ProblemStatus::Correct);
    }

    #[test]
    fn grade_correct_iff_normal_forms_match() {
        let g = Grader::default();
        let answers = ["10", "１０", "10cm", "1 0", "11", "x", "10円", "ten", "", "  "];
        for s in answers {
            for c in answers {
                // A blank answer is never graded, even against a blank key.
                if s.trim().is_empty() {
                    assert_eq!(g.grade(s, c), ProblemStatus::Unanswered, "{s:?} vs {c:?}");
                    continue;
                }
                let expected = g.normalize(s) == g.normalize(c);
                assert_eq!(
                    g.grade(s, c) == ProblemStatus::Correct,
                    expected,
                    "{s:?} vs {c:?}"
                );
            }
        }
    }

    #[test]
    fn configured_units_extend_the_set() {
        let g = Grader::with_units(["cm", "本", "", " 枚 "]);
        assert_eq!(g.normalize("5本"), "5");
        assert_eq!(g.normalize("5枚"), "5");
        assert_eq!(g.units().len(), 3);
    }
}
