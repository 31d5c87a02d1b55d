pub mod audit;
pub mod idempotency;
pub mod ledger;
pub mod prices;

pub use audit::AuditLog;
pub use idempotency::IdempotencyIndex;
pub use ledger::{LedgerOutcome, WalletLedger};
pub use prices::ServicePriceRegistry;

#[cfg(test)]
mod tests {
    use domain::model::Money;

    /// Invariant 2 (spec §8): for every completed transaction,
    /// balanceAfter = balanceBefore + signed amount.
    #[test]
    fn balance_arithmetic_matches_signed_amount() {
        let balance_before: Money = 10_000;
        let charge: Money = 1_900;
        let balance_after = balance_before - charge;
        assert_eq!(balance_after, 8_100);

        let refunded = balance_after + charge;
        assert_eq!(refunded, balance_before);
    }
}
