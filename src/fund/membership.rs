use crate::db::fund as repo;
use crate::db::model::{Member, Membership};
use crate::db::Pool;
use crate::model::MembershipStatus;
use anyhow::Result;
use tracing::{debug, instrument};

/// Outcome of mapping a login to the member's active membership.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub status: MembershipStatus,
    pub member: Option<Member>,
    pub membership: Option<Membership>,
}

impl Resolution {
    /// The approved membership, if resolution succeeded.
    pub fn approved(&self) -> Option<(&Member, &Membership)> {
        match (self.status, &self.member, &self.membership) {
            (MembershipStatus::Approved, Some(member), Some(ship)) => Some((member, ship)),
            _ => None,
        }
    }
}

/// Resolves `email` to a member and their current membership, repairing a
/// stale `current` pointer along the way.
#[instrument(skip_all)]
pub async fn resolve(pool: &Pool, email: &str) -> Result<Resolution> {
    let Some(mut member) = repo::find_member_by_email(pool, email).await? else {
        return Ok(Resolution {
            status: MembershipStatus::NoMember,
            member: None,
            membership: None,
        });
    };

    let ships = repo::memberships_for_member(pool, member.id).await?;
    let Some(first) = ships.first() else {
        if member.current != 0 {
            repo::set_member_current(pool, member.id, 0).await?;
            member.current = 0;
        }
        return Ok(Resolution {
            status: MembershipStatus::NoMembership,
            member: Some(member),
            membership: None,
        });
    };

    let mut chosen = match ships.iter().find(|s| s.id == member.current) {
        Some(ship) => ship,
        None => {
            debug!(member_id = member.id, current = member.current, "stale current membership");
            first
        }
    };
    if !chosen.approved {
        if let Some(approved) = ships.iter().find(|s| s.approved) {
            chosen = approved;
        }
    }
    if chosen.id != member.current {
        repo::set_member_current(pool, member.id, chosen.id).await?;
        member.current = chosen.id;
    }

    let status = if chosen.approved {
        MembershipStatus::Approved
    } else {
        MembershipStatus::Unapproved
    };
    let membership = Some(chosen.clone());
    Ok(Resolution {
        status,
        member: Some(member),
        membership,
    })
}
