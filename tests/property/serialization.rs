//! Property-based tests for the wire codec and field validation.
//!
//! Uses proptest to verify:
//! 1. Random bytes never cause a panic when decoded as either frame type.
//! 2. Frames over the size limit are always rejected.
//! 3. Enum names parse for exactly the valid spellings.
//! 4. Applying an update and then its inverse restores the touched fields.
//! 5. Drafts survive the trip through the wire unchanged.

use proptest::prelude::*;
use taskboard_proto::codec::{self, CodecError};
use taskboard_proto::sync::{ClientFrame, Request, RequestId};
use taskboard_proto::task::*;
use uuid::Uuid;

// --- Strategies ---

fn arb_task_id() -> impl Strategy<Value = TaskId> {
    any::<u128>().prop_map(|n| TaskId::from_uuid(Uuid::from_u128(n)))
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::Low), Just(Priority::Medium), Just(Priority::High)]
}

fn arb_category() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::Bug),
        Just(Category::Feature),
        Just(Category::Enhancement)
    ]
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Todo),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Done)
    ]
}

fn arb_title() -> impl Strategy<Value = String> {
    "[^\x00]{1,64}"
}

fn arb_record() -> impl Strategy<Value = TaskRecord> {
    (
        arb_task_id(),
        arb_title(),
        arb_priority(),
        arb_category(),
        arb_status(),
        proptest::option::of("[a-z0-9/._-]{1,32}"),
        any::<u32>(),
    )
        .prop_map(|(id, title, priority, category, status, attachment, ts)| {
            let task = NewTask {
                title,
                priority,
                category,
                status,
                attachment,
            };
            TaskRecord::from_new(id, task, u64::from(ts))
        })
}

fn arb_changes() -> impl Strategy<Value = TaskChanges> {
    (
        proptest::option::of(arb_title()),
        proptest::option::of(arb_priority()),
        proptest::option::of(arb_category()),
        proptest::option::of(arb_status()),
        proptest::option::of(proptest::option::of("[a-z0-9/._-]{1,32}")),
    )
        .prop_map(|(title, priority, category, status, attachment)| TaskChanges {
            title,
            priority,
            category,
            status,
            attachment,
        })
}

// --- Property tests ---

proptest! {
    /// Random bytes never cause a panic when decoded as a client frame.
    #[test]
    fn random_bytes_client_frame_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_client_frame(&bytes, codec::DEFAULT_MAX_FRAME_SIZE);
    }

    /// Random bytes never cause a panic when decoded as a server message.
    #[test]
    fn random_bytes_server_message_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_server_message(&bytes);
    }

    /// Anything longer than the limit is rejected before decoding.
    #[test]
    fn oversized_frames_rejected(max in 0usize..64, extra in 1usize..64) {
        let bytes = vec![0u8; max + extra];
        let result = codec::decode_client_frame(&bytes, max);
        let rejected = matches!(result, Err(CodecError::FrameTooLarge { .. }));
        prop_assert!(rejected);
    }

    /// Status names parse for exactly `todo`, `in-progress` and `done`.
    #[test]
    fn status_parse_accepts_only_valid_names(name in "[a-z-]{0,12}") {
        let valid = matches!(name.as_str(), "todo" | "in-progress" | "done");
        let parsed = name.parse::<TaskStatus>();
        prop_assert_eq!(parsed.is_ok(), valid);
        if let Ok(status) = parsed {
            prop_assert_eq!(status.as_str(), name.as_str());
        }
    }

    /// Priority names parse for exactly `low`, `medium` and `high`.
    #[test]
    fn priority_parse_accepts_only_valid_names(name in "[a-z]{0,8}") {
        let valid = matches!(name.as_str(), "low" | "medium" | "high");
        prop_assert_eq!(name.parse::<Priority>().is_ok(), valid);
    }

    /// Category names parse for exactly `bug`, `feature` and `enhancement`.
    #[test]
    fn category_parse_accepts_only_valid_names(name in "[a-z]{0,12}") {
        let valid = matches!(name.as_str(), "bug" | "feature" | "enhancement");
        prop_assert_eq!(name.parse::<Category>().is_ok(), valid);
    }

    /// Applying changes and then their inverse gives back the original record.
    #[test]
    fn inverse_restores_record(record in arb_record(), changes in arb_changes()) {
        let inverse = changes.inverse_for(&record);
        let mut edited = record.clone();
        changes.apply_to(&mut edited);
        inverse.apply_to(&mut edited);
        prop_assert_eq!(edited, record);
    }

    /// A create frame decodes to the draft that was sent, and the draft
    /// validates back to the same task.
    #[test]
    fn create_frame_preserves_draft(record in arb_record(), id in any::<u64>()) {
        let task = NewTask {
            title: record.title.clone(),
            priority: record.priority,
            category: record.category,
            status: record.status,
            attachment: record.attachment.clone(),
        };
        let frame = ClientFrame {
            request_id: RequestId(id),
            request: Request::Create(task.to_draft()),
        };
        let bytes = codec::encode(&frame).expect("encode should succeed");
        let decoded = codec::decode_client_frame(&bytes, usize::MAX).expect("decode should succeed");
        prop_assert_eq!(&decoded, &frame);

        let Request::Create(draft) = decoded.request else {
            return Err(TestCaseError::fail("not a create"));
        };
        prop_assert_eq!(draft.validate().expect("valid draft"), task);
    }
}
