// crates/expunge-core/src/core/identifiers.rs
// ============================================================================
// Module: Expunge Identifiers
// Description: Canonical opaque identifiers for runs, tasks, and schedules.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Expunge.
//! Identifiers are opaque strings and serialize transparently on the wire;
//! no normalization or validation is applied by these types.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares an opaque string identifier with the standard accessors.
macro_rules! string_identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// # Invariants
        /// - Opaque UTF-8 string; no normalization or validation is applied by this type.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_identifier! {
    /// Run identifier for one execution of one plan.
    RunId
}

string_identifier! {
    /// Plan identifier resolved against the plans root.
    PlanId
}

string_identifier! {
    /// Task identifier stable within a plan definition.
    TaskId
}

string_identifier! {
    /// Task instance identifier (one per run and task definition).
    TaskRunId
}

string_identifier! {
    /// Approval identifier for a manual gate record.
    ApprovalId
}

string_identifier! {
    /// Artifact identifier for an on-disk file tracked by the store.
    ArtifactId
}

string_identifier! {
    /// Schedule identifier for a periodic trigger record.
    ScheduleId
}

string_identifier! {
    /// Data-broker identifier from the broker catalog.
    BrokerId
}

string_identifier! {
    /// PII profile identifier referenced by schedules and plan params.
    ProfileId
}

string_identifier! {
    /// Runner identity used for lease-based run claims.
    RunnerId
}
