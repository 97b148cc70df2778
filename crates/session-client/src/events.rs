//! Session lifecycle side effects
//!
//! The transport core never renders anything; it reports the two outcomes
//! that need the embedding application to navigate somewhere. Each fires
//! once per refresh failure, however many requests were queued behind it.

use common::wire::LegalFlags;
use std::fmt;

/// A legal document whose accepted version is behind the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegalDocument {
    Terms,
    PrivacyPolicy,
}

impl LegalDocument {
    /// Pick the document to re-accept first. Terms win when both are stale.
    pub fn from_flags(flags: LegalFlags) -> Option<Self> {
        if flags.terms_outdated {
            Some(LegalDocument::Terms)
        } else if flags.privacy_policy_outdated {
            Some(LegalDocument::PrivacyPolicy)
        } else {
            None
        }
    }

    /// Route of the re-acceptance flow for this document.
    pub fn reacceptance_path(&self) -> &'static str {
        match self {
            LegalDocument::Terms => "/legal/terms",
            LegalDocument::PrivacyPolicy => "/legal/privacy",
        }
    }
}

impl fmt::Display for LegalDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegalDocument::Terms => write!(f, "terms of service"),
            LegalDocument::PrivacyPolicy => write!(f, "privacy policy"),
        }
    }
}

/// Receives session-level side effects from the transport core.
pub trait SessionEvents: Send + Sync {
    /// Credentials are gone: clear local session indicators and show login.
    fn signed_out(&self) {}

    /// Credentials were kept but `document` must be re-accepted before
    /// normal traffic resumes.
    fn reacceptance_required(&self, _document: LegalDocument) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl SessionEvents for NoopEvents {}
