#[cfg(feature = "testing")]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

#[cfg_attr(feature = "testing", derive(Arbitrary))]
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    #[default]
    Pending, // Record was inserted into the store
    Running,   // The server accepted the async submission
    Succeeded, // Query completed and results were fetched
    Failed,    // Query failed (connect, submit, execution or internal)
    Canceled,  // Query was canceled from the outside
    Timeout,   // query_timeout elapsed while running
}

impl QueryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryStatus::Succeeded | QueryStatus::Failed | QueryStatus::Canceled | QueryStatus::Timeout
        )
    }

    pub fn transitions(&self) -> Vec<QueryStatus> {
        match self {
            QueryStatus::Pending => vec![QueryStatus::Running, QueryStatus::Failed],
            QueryStatus::Running => vec![
                QueryStatus::Succeeded,
                QueryStatus::Failed,
                QueryStatus::Canceled,
                QueryStatus::Timeout,
            ],
            // Terminal states have no valid next states
            QueryStatus::Succeeded
            | QueryStatus::Failed
            | QueryStatus::Canceled
            | QueryStatus::Timeout => vec![],
        }
    }

    pub fn invalid_transitions(&self) -> Vec<QueryStatus> {
        let valid = self.transitions();
        QueryStatus::iter()
            .filter(|s| *s != *self && !valid.contains(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::arb_valid_status_path;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn valid_paths_start_pending_and_end_terminal(path in arb_valid_status_path()) {
            prop_assert_eq!(path[0], QueryStatus::Pending);
            prop_assert!(path.last().unwrap().is_terminal());
            for pair in path.windows(2) {
                prop_assert!(pair[0].transitions().contains(&pair[1]));
            }
        }
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in QueryStatus::iter().filter(QueryStatus::is_terminal) {
            assert!(status.transitions().is_empty(), "{status} must be final");
        }
    }

    #[test]
    fn pending_cannot_skip_to_success() {
        assert!(QueryStatus::Pending
            .invalid_transitions()
            .contains(&QueryStatus::Succeeded));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&QueryStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        assert_eq!(QueryStatus::Timeout.to_string(), "timeout");
    }
}
