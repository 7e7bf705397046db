//! The standard cascade rule table over the fixture collections.
//!
//! Deleting a part:
//!
//! | Dependent       | Action                                          |
//! |-----------------|-------------------------------------------------|
//! | `battles`       | rejected while one of its battles is active     |
//! | `commitments`   | rejected while one of its commitments is in progress |
//! | `commitments`   | deleted                                         |
//! | `battles`       | deleted                                         |
//! | `journal`       | `partId` stripped                               |
//! | `circles`       | id filtered out of `memberIds`                  |
//! | `conversations` | its lines removed; emptied conversations dropped |

use crate::fixtures::{BATTLES, CIRCLES, COMMITMENTS, CONVERSATIONS, JOURNAL, PARTS};
use hearth_core::{CascadeRule, CascadeRules, Document};

/// Builds the standard rule table.
pub fn standard_rules() -> CascadeRules {
    CascadeRules::new()
        .with(CascadeRule::reject_deletion(
            PARTS,
            BATTLES,
            "partId",
            |battle: &Document| battle.get_str("state") == Some("active"),
            "part is fighting an active battle",
        ))
        .with(CascadeRule::reject_deletion(
            PARTS,
            COMMITMENTS,
            "partId",
            |commitment: &Document| commitment.get_str("status") == Some("inProgress"),
            "part has a commitment in progress",
        ))
        .with(CascadeRule::delete_dependent(PARTS, COMMITMENTS, "partId"))
        .with(CascadeRule::delete_dependent(PARTS, BATTLES, "partId"))
        .with(CascadeRule::strip_reference(PARTS, JOURNAL, "partId"))
        .with(CascadeRule::filter_array(PARTS, CIRCLES, "memberIds"))
        .with(CascadeRule::filter_embedded(
            PARTS,
            CONVERSATIONS,
            "lines",
            "authorId",
            true,
        ))
}
