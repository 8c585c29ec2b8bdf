//! Who is calling a service operation

/// Role value that makes a promotion visible to everyone
pub const EVERYONE_ROLE: i32 = 0;

/// Caller context handed in by the surrounding HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Caller {
    #[default]
    Anonymous,
    /// Storefront customer
    Customer { user_id: i64, role: i32 },
    /// Back-office operator
    Backoffice { user_id: i64 },
}

impl Caller {
    pub fn is_customer(&self) -> bool {
        matches!(self, Caller::Customer { .. })
    }

    pub fn customer_id(&self) -> Option<i64> {
        match self {
            Caller::Customer { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    /// Roles whose promotions this caller can see
    pub fn visible_roles(&self) -> Vec<i32> {
        match self {
            Caller::Customer { role, .. } if *role != EVERYONE_ROLE => vec![EVERYONE_ROLE, *role],
            _ => vec![EVERYONE_ROLE],
        }
    }
}
