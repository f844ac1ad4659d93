//! The small transactional pattern every mutating command is built on:
//! actions validate their preconditions while the plan is being
//! constructed, so a plan that cannot succeed fails before any step has an
//! observable effect. Execution is strictly sequential; there is no
//! rollback of already-executed actions (each action is individually safe
//! to have applied).

use crate::core::context::ExecutionContext;
use crate::error::{DwsError, Result};

/// One step of a plan. Constructors do the precondition checks (returning
/// `Result<Self>`); `run` performs the effect.
pub trait Action {
    fn describe(&self) -> String;
    fn run(&mut self, ctx: &ExecutionContext) -> Result<()>;
}

#[derive(Default)]
pub struct Plan {
    actions: Vec<Box<dyn Action>>,
}

impl Plan {
    pub fn new() -> Self {
        Self { actions: Vec::new() }
    }

    pub fn push(&mut self, action: Box<dyn Action>) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

/// Run the plan in order, stopping at the first failure. In interactive
/// mode the user confirms first; verbose mode prints each step.
pub fn run_plan(mut plan: Plan, confirm_prompt: &str, done_message: &str, ctx: &ExecutionContext) -> Result<()> {
    if ctx.verbose {
        eprintln!("Plan ({} step(s)):", plan.len());
        for (i, action) in plan.actions.iter().enumerate() {
            eprintln!("  {}. {}", i + 1, action.describe());
        }
    }
    if !ctx.confirm(&format!("Should I {}?", confirm_prompt))? {
        return Err(DwsError::Aborted);
    }
    for action in plan.actions.iter_mut() {
        ctx.vlog(&format!("Running: {}", action.describe()));
        action.run(ctx).map_err(|e| DwsError::Generic {
            message: format!("Step '{}' failed: {}", action.describe(), e),
            source: Some(Box::new(e)),
        })?;
    }
    ctx.vlog(done_message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Record {
        label: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        fail: bool,
    }

    impl Action for Record {
        fn describe(&self) -> String {
            self.label.to_string()
        }

        fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
            self.log.borrow_mut().push(self.label);
            if self.fail {
                Err(DwsError::config("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn batch() -> ExecutionContext {
        ExecutionContext::new(true, false)
    }

    #[test]
    fn test_actions_run_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut plan = Plan::new();
        for label in ["first", "second", "third"] {
            plan.push(Box::new(Record { label, log: Rc::clone(&log), fail: false }));
        }
        run_plan(plan, "run the test plan", "done", &batch()).unwrap();
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failure_stops_the_plan() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut plan = Plan::new();
        plan.push(Box::new(Record { label: "ok", log: Rc::clone(&log), fail: false }));
        plan.push(Box::new(Record { label: "bad", log: Rc::clone(&log), fail: true }));
        plan.push(Box::new(Record { label: "never", log: Rc::clone(&log), fail: false }));

        let err = run_plan(plan, "run the test plan", "done", &batch()).unwrap_err();
        assert!(err.to_string().contains("bad"));
        // No rollback, no continuation.
        assert_eq!(*log.borrow(), vec!["ok", "bad"]);
    }
}
