//! Existence checks.
//!
//! A check never mutates and never goes unknown in test mode; absence is
//! a valid outcome, not a systemic failure.

use crate::admin::VmAdmin;
use reconcile::{RunContext, StatusRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Exists,
    Missing,
}

pub fn check(admin: &dyn VmAdmin, _ctx: &RunContext, name: &str, mode: CheckMode) -> StatusRecord {
    let exists = admin.resolve(name).is_ok();
    match (mode, exists) {
        (CheckMode::Exists, true) => StatusRecord::note(format!("VM '{name}' exists")),
        (CheckMode::Exists, false) => {
            StatusRecord::failure(format!("VM '{name}' does not exist"))
        }
        (CheckMode::Missing, false) => StatusRecord::note(format!("VM '{name}' is missing")),
        (CheckMode::Missing, true) => {
            StatusRecord::failure(format!("VM '{name}' is not missing"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::mock::{MockAdmin, MockVm};

    #[test]
    fn test_exists_check_on_present_vm_passes() {
        let admin = MockAdmin::new().with_vm("work", MockVm::default());
        let ctx = RunContext::new(false);
        let record = check(&admin, &ctx, "work", CheckMode::Exists);
        assert!(!record.failed());
        assert!(!record.changed);
    }

    #[test]
    fn test_missing_check_on_absent_vm_passes() {
        let admin = MockAdmin::new();
        let ctx = RunContext::new(false);
        let record = check(&admin, &ctx, "ghost", CheckMode::Missing);
        assert!(!record.failed());
    }

    #[test]
    fn test_missing_check_on_present_vm_fails() {
        let admin = MockAdmin::new().with_vm("work", MockVm::default());
        let ctx = RunContext::new(false);
        assert!(check(&admin, &ctx, "work", CheckMode::Missing).failed());
    }

    #[test]
    fn test_checks_are_exact_even_in_test_mode() {
        // A check performs no mutation, so dry-run does not degrade its
        // outcome to unknown.
        let admin = MockAdmin::new().with_vm("work", MockVm::default());
        let ctx = RunContext::new(true);
        let record = check(&admin, &ctx, "work", CheckMode::Exists);
        assert_eq!(record.outcome, reconcile::Outcome::Success);
    }
}
