//! Waits on the text of an input field.

use std::sync::Arc;
use std::time::Duration;

use crate::action::Action;
use crate::action::poll::{PollOptions, poll};
use crate::core::errors::IthError;
use crate::surface::AutomationConn;
use crate::uiauto::automation::UiAutoContext;
use crate::uiauto::finder::Finder;

/// Default time a field gets to reach the expected text.
pub const DEFAULT_FIELD_TIMEOUT: Duration = Duration::from_secs(10);

type TextPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

fn wait_for_text(
    conn: Arc<dyn AutomationConn>,
    finder: &Finder,
    expected: String,
    matches: TextPredicate,
    timeout: Duration,
) -> Action {
    let ui = UiAutoContext::new(conn);
    let finder = finder.clone();
    Action::new(move |ctx| {
        poll(
            ctx,
            |c| {
                let observed = ui.info(c, &finder)?.value;
                if matches(&observed) {
                    Ok(())
                } else {
                    Err(IthError::Assertion {
                        what: format!("text of field {finder}"),
                        expected: expected.clone(),
                        observed,
                    })
                }
            },
            &PollOptions::with_timeout(timeout),
        )
    })
}

/// Wait until the field's value equals `expected`.
pub fn wait_for_field_text_to_be(
    conn: Arc<dyn AutomationConn>,
    finder: &Finder,
    expected: &str,
) -> Action {
    wait_for_field_text_to_be_with_timeout(conn, finder, expected, DEFAULT_FIELD_TIMEOUT)
}

pub fn wait_for_field_text_to_be_with_timeout(
    conn: Arc<dyn AutomationConn>,
    finder: &Finder,
    expected: &str,
    timeout: Duration,
) -> Action {
    let want = expected.to_string();
    wait_for_text(
        conn,
        finder,
        expected.to_string(),
        Arc::new(move |got| got == want),
        timeout,
    )
}

/// Same as [`wait_for_field_text_to_be`] with both sides lowercased.
pub fn wait_for_field_text_to_be_ignoring_case(
    conn: Arc<dyn AutomationConn>,
    finder: &Finder,
    expected: &str,
) -> Action {
    wait_for_field_text_to_be_ignoring_case_with_timeout(conn, finder, expected, DEFAULT_FIELD_TIMEOUT)
}

pub fn wait_for_field_text_to_be_ignoring_case_with_timeout(
    conn: Arc<dyn AutomationConn>,
    finder: &Finder,
    expected: &str,
    timeout: Duration,
) -> Action {
    let want = expected.to_lowercase();
    wait_for_text(
        conn,
        finder,
        expected.to_string(),
        Arc::new(move |got| got.to_lowercase() == want),
        timeout,
    )
}

/// Wait until `predicate` holds for the field's value; `description` names
/// the expectation in the failure message.
pub fn wait_for_field_text_to_satisfy<F>(
    conn: Arc<dyn AutomationConn>,
    finder: &Finder,
    description: &str,
    predicate: F,
) -> Action
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    wait_for_field_text_to_satisfy_with_timeout(conn, finder, description, predicate, DEFAULT_FIELD_TIMEOUT)
}

pub fn wait_for_field_text_to_satisfy_with_timeout<F>(
    conn: Arc<dyn AutomationConn>,
    finder: &Finder,
    description: &str,
    predicate: F,
    timeout: Duration,
) -> Action
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    wait_for_text(conn, finder, description.to_string(), Arc::new(predicate), timeout)
}

/// Wait until the field holds any text.
pub fn wait_for_field_not_empty(conn: Arc<dyn AutomationConn>, finder: &Finder) -> Action {
    wait_for_field_not_empty_with_timeout(conn, finder, DEFAULT_FIELD_TIMEOUT)
}

pub fn wait_for_field_not_empty_with_timeout(
    conn: Arc<dyn AutomationConn>,
    finder: &Finder,
    timeout: Duration,
) -> Action {
    wait_for_text(
        conn,
        finder,
        "non-empty text".to_string(),
        Arc::new(|got| !got.is_empty()),
        timeout,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::errors::Result;
    use crate::surface::Request;
    use crate::uiauto::node::{Role, UiNode};
    use parking_lot::Mutex;
    use serde_json::Value;

    struct Field {
        values: Mutex<Vec<&'static str>>,
    }

    impl AutomationConn for Field {
        fn call(&self, _ctx: &Context, req: &Request) -> Result<Value> {
            assert_eq!(*req, Request::Snapshot);
            let mut values = self.values.lock();
            let value = if values.len() > 1 {
                values.remove(0)
            } else {
                values[0]
            };
            let tree = UiNode {
                id: 1,
                role: Role::RootWebArea,
                children: vec![UiNode {
                    id: 2,
                    role: Role::TextField,
                    name: "textInputField".into(),
                    value: value.into(),
                    ..UiNode::default()
                }],
                ..UiNode::default()
            };
            Ok(serde_json::to_value(tree)?)
        }
    }

    fn field(values: Vec<&'static str>) -> Arc<dyn AutomationConn> {
        Arc::new(Field {
            values: Mutex::new(values),
        })
    }

    fn finder() -> Finder {
        Finder::new().name("textInputField")
    }

    #[test]
    fn waits_until_value_settles() {
        let conn = field(vec!["", "hel", "hello"]);
        wait_for_field_text_to_be(conn, &finder(), "hello")
            .run(&Context::background())
            .unwrap();
    }

    #[test]
    fn case_fold_applies_to_both_sides() {
        let conn = field(vec!["ÀÉÎ Hello"]);
        wait_for_field_text_to_be_ignoring_case(conn.clone(), &finder(), "àéî hELLO")
            .run(&Context::background())
            .unwrap();
        let err = wait_for_field_text_to_be_with_timeout(
            conn,
            &finder(),
            "àéî hello",
            Duration::from_millis(200),
        )
        .run(&Context::background())
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ÀÉÎ Hello") && msg.contains("àéî hello"), "{msg}");
    }

    #[test]
    fn predicate_description_appears_on_failure() {
        let conn = field(vec!["abc"]);
        let err = wait_for_field_text_to_satisfy_with_timeout(
            conn.clone(),
            &finder(),
            "three digits",
            |t| t.len() == 3 && t.chars().all(|c| c.is_ascii_digit()),
            Duration::ZERO,
        )
        .run(&Context::background())
        .unwrap_err();
        assert!(err.to_string().contains("three digits"));
        wait_for_field_not_empty(conn, &finder())
            .run(&Context::background())
            .unwrap();
    }
}
