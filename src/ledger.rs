use crate::error::AppError;

/// Removes `amount` from `balance`, or leaves it untouched and reports
/// `InsufficientCredit`. Balances are never clamped.
pub fn debit(balance: &mut u32, amount: u32) -> Result<u32, AppError> {
    if *balance < amount {
        return Err(AppError::InsufficientCredit {
            balance: *balance,
            cost: amount,
        });
    }
    *balance -= amount;
    Ok(*balance)
}

pub fn credit(balance: &mut u32, amount: u32) -> u32 {
    *balance = balance.saturating_add(amount);
    *balance
}
