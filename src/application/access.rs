use crate::domain::order::Order;
use crate::domain::user::{User, UserId, UserRole};
use crate::error::{MarketplaceError, Result};
use serde::{Deserialize, Serialize};

/// The already-authenticated caller of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: UserId, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_technician(&self) -> bool {
        self.role == UserRole::Technician
    }

    pub fn is_client(&self) -> bool {
        self.role == UserRole::Client
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self::new(user.id, user.role)
    }
}

fn denied(message: &str) -> MarketplaceError {
    MarketplaceError::PermissionDenied(message.to_string())
}

pub fn ensure_admin(actor: &Actor) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(denied("Only admins can perform this action."))
    }
}

/// The order's client, or an admin.
pub fn ensure_client_owner_or_admin(actor: &Actor, order: &Order) -> Result<()> {
    if actor.is_admin() || (actor.is_client() && order.client == actor.user_id) {
        Ok(())
    } else {
        Err(denied("Only the client who owns this order can perform this action."))
    }
}

/// The technician assigned to the order, or an admin.
pub fn ensure_assigned_technician_or_admin(actor: &Actor, order: &Order) -> Result<()> {
    if actor.is_admin() || (actor.is_technician() && order.technician == Some(actor.user_id)) {
        Ok(())
    } else {
        Err(denied("Only the technician assigned to this order can perform this action."))
    }
}

/// Either side of the order, or an admin.
pub fn ensure_participant_or_admin(actor: &Actor, order: &Order) -> Result<()> {
    if actor.is_admin() || is_participant(actor, order) {
        Ok(())
    } else {
        Err(denied("You are not a participant in this order."))
    }
}

/// The user themselves, or an admin.
pub fn ensure_self_or_admin(actor: &Actor, user_id: UserId) -> Result<()> {
    if actor.is_admin() || actor.user_id == user_id {
        Ok(())
    } else {
        Err(denied("You can only access your own account."))
    }
}

pub fn is_participant(actor: &Actor, order: &Order) -> bool {
    order.client == actor.user_id || order.technician == Some(actor.user_id)
}
