//! Value resolver: wildcard placeholder substitution and consumption modes.

pub mod wildcard;

pub use wildcard::{
    apply_text_consumption_mode, process_text_variant, resolve_wildcards, WildcardDef,
    WildcardPick, WildcardUsage,
};
