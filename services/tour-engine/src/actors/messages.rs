//! Message vocabulary shared by guides, groups and the coordinator.
//!
//! Every message travels as an [`Envelope`]: the sender's handle plus a
//! [`Body`]. Bodies carry their own correlation ids, so a receiver can tell a
//! current reply from a stale one without looking at the sender.

use galerie_id::{GroupId, GuideId, RequestId};

use super::framework::ActorHandle;
use crate::catalogue::Exhibit;
use crate::status::Status;
use crate::visitors::GroupProfile;

/// Handle to any tour participant.
pub type Address = ActorHandle<Envelope>;

#[derive(Debug)]
pub struct Envelope {
    pub sender: Address,
    pub body: Body,
}

impl Envelope {
    pub fn new(sender: &Address, body: Body) -> Self {
        Self {
            sender: sender.clone(),
            body,
        }
    }
}

/// Why a guide said no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefusalReason {
    /// Not `AVAILABLE` when the request arrived.
    Busy,
    GroupTooLarge { size: u32, max: u32 },
}

impl std::fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefusalReason::Busy => f.write_str("busy"),
            RefusalReason::GroupTooLarge { size, max } => {
                write!(f, "group of {size} exceeds bound of {max}")
            }
        }
    }
}

#[derive(Debug)]
pub enum Body {
    /// Group asks the coordinator for a guide, or coordinator offers a group
    /// to a guide.
    TourRequest {
        request_id: RequestId,
        group: GroupProfile,
    },
    /// Priority or VIP group asking for a guide.
    PriorityGroup {
        request_id: RequestId,
        group: GroupProfile,
    },
    /// Group that must be served before anyone else.
    Emergency {
        request_id: RequestId,
        group: GroupProfile,
    },
    /// Guide accepted; the coordinator forwards it to the group unchanged.
    TourAccepted {
        request_id: RequestId,
        group_id: GroupId,
        guide_id: GuideId,
        guide: Address,
    },
    TourRefused {
        request_id: RequestId,
        group_id: GroupId,
        guide_id: GuideId,
        reason: RefusalReason,
    },
    /// Coordinator withdraws an offer the guide accepted.
    TourCancelled {
        request_id: RequestId,
        guide_id: GuideId,
    },
    /// Group is at the rendez-vous point and ready to follow its guide.
    TourStarted { group_id: GroupId, guide_id: GuideId },
    TableauInfo {
        guide_id: GuideId,
        group_id: GroupId,
        exhibit: Exhibit,
        /// 1-based position on the tour.
        position: u32,
        total: u32,
    },
    TourFinished {
        guide_id: GuideId,
        group_id: GroupId,
        exhibits_presented: u32,
    },
    /// An incident took the guide offline. Sent to a guide to trigger one,
    /// by the guide to the coordinator, and relayed by the coordinator to
    /// the affected group.
    GuideProblem {
        guide_id: GuideId,
        group_id: Option<GroupId>,
        description: String,
    },
    /// Brings a blocked guide back into service.
    GuideReset { guide_id: GuideId },
    /// Guide is advertising again and can take a group up to this size.
    GuideAvailable { guide_id: GuideId, max_group_size: u32 },
    StatusReport { guide_id: GuideId, status: Status },

    // Self-addressed timers.
    NegotiationTimeout { request_id: RequestId },
    PresentNext { tour: u64 },
    AssignmentTimeout { epoch: u64 },
    RetryAnnounce { attempt: u32 },
}

impl Body {
    /// Wire-style name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::TourRequest { .. } => "TOUR_REQUEST",
            Body::PriorityGroup { .. } => "PRIORITY_GROUP",
            Body::Emergency { .. } => "EMERGENCY",
            Body::TourAccepted { .. } => "TOUR_ACCEPTED",
            Body::TourRefused { .. } => "TOUR_REFUSED",
            Body::TourCancelled { .. } => "TOUR_CANCELLED",
            Body::TourStarted { .. } => "TOUR_STARTED",
            Body::TableauInfo { .. } => "TABLEAU_INFO",
            Body::TourFinished { .. } => "TOUR_FINISHED",
            Body::GuideProblem { .. } => "GUIDE_PROBLEM",
            Body::GuideReset { .. } => "GUIDE_RESET",
            Body::GuideAvailable { .. } => "GUIDE_AVAILABLE",
            Body::StatusReport { .. } => "STATUS_REPORT",
            Body::NegotiationTimeout { .. } => "NEGOTIATION_TIMEOUT",
            Body::PresentNext { .. } => "PRESENT_NEXT",
            Body::AssignmentTimeout { .. } => "ASSIGNMENT_TIMEOUT",
            Body::RetryAnnounce { .. } => "RETRY_ANNOUNCE",
        }
    }
}
