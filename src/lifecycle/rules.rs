//! State-machine guards shared by the lifecycle operations.

use chrono::{DateTime, Duration, Utc};

use crate::account::Account;
use crate::contract::{Contract, ContractStatus};
use crate::error::ConflictError;

/// Who may act on a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Party {
    /// Only the requester who posted it.
    Owner,
    /// The requester or the assigned driver.
    OwnerOrDriver,
}

/// Is `account` allowed to act on `contract` as `party`?
pub(crate) fn is_permitted(account: &Account, contract: &Contract, party: Party) -> bool {
    match account {
        Account::Requester(p) => p.id == contract.requester_id,
        Account::Driver(p) => party == Party::OwnerOrDriver && contract.driver_id == Some(p.id),
    }
}

/// `to` must be reachable from `from` in one step.
pub(crate) fn ensure_edge(from: ContractStatus, to: ContractStatus) -> Result<(), ConflictError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ConflictError::InvalidTransition { from, to })
    }
}

/// At least `min_hours` must remain until the move.
pub(crate) fn ensure_notice(
    action: &str,
    move_date_time: DateTime<Utc>,
    now: DateTime<Utc>,
    min_hours: i64,
) -> Result<(), ConflictError> {
    let left = move_date_time - now;
    if left >= Duration::hours(min_hours) {
        Ok(())
    } else {
        Err(ConflictError::TooCloseToMoveDate {
            action: action.to_string(),
            hours_left: left.num_hours(),
            min_hours,
        })
    }
}

/// Status change requested through a plain update.
///
/// Backward moves are always refused. Forward moves that need extra data
/// (driver, reason, rating) have dedicated operations; only the data-free
/// `REQUESTED -> OFFERED` step is allowed here.
pub(crate) fn ensure_patch_status(from: ContractStatus, to: ContractStatus) -> Result<(), ConflictError> {
    if to.ordinal() < from.ordinal() {
        return Err(ConflictError::StatusRegression { from, to });
    }
    if to == from || (from == ContractStatus::Requested && to == ContractStatus::Offered) {
        Ok(())
    } else {
        Err(ConflictError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::contract::test_support::draft;

    #[test]
    fn notice_window_example() {
        let move_at = Utc.with_ymd_and_hms(2024, 4, 15, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 4, 13, 12, 0, 0).unwrap();
        let err = ensure_notice("cancel a contract", move_at, now, 72).unwrap_err();
        assert!(err.to_string().contains("72 hours"));
        assert!(matches!(err, ConflictError::TooCloseToMoveDate { hours_left: 46, .. }));
    }

    #[test]
    fn notice_window_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(ensure_notice("delete", now + Duration::hours(72), now, 72).is_ok());
        assert!(ensure_notice("delete", now + Duration::hours(72) - Duration::seconds(1), now, 72).is_err());
    }

    #[test]
    fn patch_status_rules() {
        use ContractStatus::*;
        assert!(ensure_patch_status(Requested, Requested).is_ok());
        assert!(ensure_patch_status(Requested, Offered).is_ok());
        assert!(matches!(
            ensure_patch_status(Offered, Requested),
            Err(ConflictError::StatusRegression { .. })
        ));
        assert!(matches!(
            ensure_patch_status(Offered, Accepted),
            Err(ConflictError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn permissions_follow_account_variant() {
        let owner = Account::requester("o", "o@example.com");
        let stranger = Account::requester("s", "s@example.com");
        let driver = Account::driver("d", "d@example.com");

        let now = Utc::now();
        let mut c = draft(owner.id(), now).into_contract(now).unwrap();

        assert!(is_permitted(&owner, &c, Party::Owner));
        assert!(!is_permitted(&stranger, &c, Party::OwnerOrDriver));
        assert!(!is_permitted(&driver, &c, Party::OwnerOrDriver));

        c.driver_id = Some(driver.id());
        assert!(is_permitted(&driver, &c, Party::OwnerOrDriver));
        assert!(!is_permitted(&driver, &c, Party::Owner));
    }
}
