// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Deskline support-chat router.
//!
//! Domain types, the error taxonomy, and the storage trait shared by every
//! other crate in the workspace.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{ConflictReason, DesklineError};
pub use traits::{PluginAdapter, StorageAdapter};
pub use types::{AdapterType, ConversationId, HealthStatus, Identity, MessageId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_distinguish_conflicts_from_missing() {
        let claimed = DesklineError::Conflict(ConflictReason::AlreadyClaimed {
            agent_id: "a1".into(),
        });
        let closed = DesklineError::Conflict(ConflictReason::ConversationClosed);
        let missing = DesklineError::NotFound("conversation c1".into());

        assert_eq!(claimed.code(), "already_claimed");
        assert_eq!(closed.code(), "conversation_closed");
        assert_eq!(missing.code(), "not_found");
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        let storage = DesklineError::Storage {
            source: Box::new(std::io::Error::other("disk gone")),
        };
        assert!(storage.is_retryable());
        assert!(
            DesklineError::Timeout {
                duration: std::time::Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(!DesklineError::Validation("empty".into()).is_retryable());
        assert!(!DesklineError::Conflict(ConflictReason::ConversationClosed).is_retryable());
    }

    #[test]
    fn public_message_hides_storage_detail() {
        let err = DesklineError::Storage {
            source: Box::new(std::io::Error::other("no such table: conversations")),
        };
        let msg = err.public_message();
        assert!(!msg.contains("conversations"));
        assert!(msg.contains("retry"));
    }

    #[test]
    fn adapter_type_round_trips_through_display() {
        use std::str::FromStr;
        for variant in [AdapterType::Channel, AdapterType::Storage] {
            let parsed = AdapterType::from_str(&variant.to_string()).expect("should parse back");
            assert_eq!(variant, parsed);
        }
    }

    #[test]
    fn storage_trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn StorageAdapter) {}
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
    }
}
