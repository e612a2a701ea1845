#![allow(missing_docs)]
use eventvault::Event;
use eventvault_derive::Event as DeriveEvent;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, DeriveEvent)]
#[event(version = 7)]
enum CustomEvent {
    Something,
    #[event(version = 9)]
    Else(u8),
    #[event(name = "thing.renamed", version = 3)]
    Renamed { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, DeriveEvent)]
enum PlainEvent {
    Only,
}

#[test]
fn derive_macro_configurable_version() {
    assert_eq!(CustomEvent::Something.event_version(), 7);
    assert_eq!(CustomEvent::Something.event_type(), "Something");

    // Variant override
    assert_eq!(CustomEvent::Else(1).event_version(), 9);
    assert_eq!(CustomEvent::Else(1).event_type(), "Else");
}

#[test]
fn derive_macro_renamed_variant() {
    let event = CustomEvent::Renamed {
        reason: "typo".into(),
    };
    assert_eq!(event.event_type(), "thing.renamed");
    assert_eq!(event.event_version(), 3);
}

#[test]
fn derive_macro_lists_every_tag_in_declaration_order() {
    assert_eq!(
        CustomEvent::event_types(),
        &["Something", "Else", "thing.renamed"]
    );
    assert_eq!(PlainEvent::event_types(), &["Only"]);
}

#[test]
fn derive_macro_defaults_to_version_one() {
    assert_eq!(PlainEvent::Only.event_version(), 1);
}
