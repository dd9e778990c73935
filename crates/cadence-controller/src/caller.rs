use crate::error::{ControllerError, Result};

/// Who is calling the controller, as established by the gateway's auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Full access to every tenant and to operator-only operations.
    Operator,
    /// Access to this one tenant's schedules.
    Tenant(String),
}

impl Caller {
    pub fn is_operator(&self) -> bool {
        matches!(self, Caller::Operator)
    }

    /// Reject access to any tenant other than the caller's own.
    pub fn authorize(&self, tenant_id: &str) -> Result<()> {
        match self {
            Caller::Operator => Ok(()),
            Caller::Tenant(own) if own == tenant_id => Ok(()),
            Caller::Tenant(_) => Err(ControllerError::Forbidden {
                tenant_id: tenant_id.to_string(),
            }),
        }
    }

    pub fn require_operator(&self) -> Result<()> {
        if self.is_operator() {
            Ok(())
        } else {
            Err(ControllerError::OperatorOnly)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenants_see_only_themselves() {
        let acme = Caller::Tenant("acme".into());
        assert!(acme.authorize("acme").is_ok());
        assert!(matches!(
            acme.authorize("beta"),
            Err(ControllerError::Forbidden { .. })
        ));
        assert!(matches!(
            acme.require_operator(),
            Err(ControllerError::OperatorOnly)
        ));
        assert!(Caller::Operator.authorize("beta").is_ok());
        assert!(Caller::Operator.require_operator().is_ok());
    }
}
