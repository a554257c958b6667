use async_trait::async_trait;

/// The "who is calling" seam. Session mechanics live elsewhere; this crate
/// only ever asks for the current authenticated owner id.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// The authenticated owner id, or `None` for anonymous callers.
    async fn current_identity(&self) -> Option<String>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn IdentityLookup) {}
};

/// Fixed identity for tests and single-user embeddings.
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn user(owner_id: impl Into<String>) -> Self {
        Self(Some(owner_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl IdentityLookup for StaticIdentity {
    async fn current_identity(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_identity_round_trips() {
        assert_eq!(
            StaticIdentity::user("traveler-1").current_identity().await,
            Some("traveler-1".to_string())
        );
        assert_eq!(StaticIdentity::anonymous().current_identity().await, None);
    }
}
