use ulid::Ulid;

use crate::engine::{Engine, EngineError};

/// Identity carried by an inbound request.
#[derive(Debug, Clone)]
pub enum RequestContext {
    /// A trusted channel (web UI backend, voice tool layer) that already knows the business.
    Trusted { business_id: Ulid },
    /// An owner credential, optionally naming the business it acts for.
    Credential {
        owner_id: Ulid,
        api_key: String,
        business_id: Option<Ulid>,
    },
    Anonymous,
}

/// An owner whose key has been checked. Only obtainable through `authenticate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedPrincipal {
    owner_id: Ulid,
}

impl VerifiedPrincipal {
    pub fn owner_id(&self) -> Ulid {
        self.owner_id
    }

    /// For connections whose password exchange already checked the owner's key.
    pub(crate) fn verified_at_startup(owner_id: Ulid) -> Self {
        Self { owner_id }
    }
}

pub fn authenticate(engine: &Engine, owner_id: Ulid, api_key: &str) -> Result<VerifiedPrincipal, EngineError> {
    if engine.verify_owner_key(&owner_id, api_key) {
        Ok(VerifiedPrincipal { owner_id })
    } else {
        metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
        Err(EngineError::AuthFailure("invalid owner credential".into()))
    }
}

/// Bind a request to exactly one business. There is no fallback to "any" business.
pub fn resolve(engine: &Engine, ctx: &RequestContext) -> Result<Ulid, EngineError> {
    match ctx {
        RequestContext::Trusted { business_id } => {
            if engine.business_exists(business_id) {
                Ok(*business_id)
            } else {
                Err(EngineError::NotFound("business", *business_id))
            }
        }
        RequestContext::Credential {
            owner_id,
            api_key,
            business_id,
        } => {
            let principal = authenticate(engine, *owner_id, api_key)?;
            resolve_for_principal(engine, &principal, *business_id)
        }
        RequestContext::Anonymous => Err(EngineError::AuthFailure("no business context or credential".into())),
    }
}

pub fn resolve_for_principal(
    engine: &Engine,
    principal: &VerifiedPrincipal,
    requested: Option<Ulid>,
) -> Result<Ulid, EngineError> {
    let owned = engine.businesses_owned_by(&principal.owner_id);
    match (requested, owned.as_slice()) {
        (Some(id), owned) if owned.contains(&id) => Ok(id),
        (Some(id), _) => Err(EngineError::AuthFailure(format!(
            "owner {} does not own business {id}",
            principal.owner_id
        ))),
        (None, []) => Err(EngineError::NotFound("business for owner", principal.owner_id)),
        (None, [only]) => Ok(*only),
        (None, _) => Err(EngineError::validation(format!(
            "owner {} has several businesses; name one",
            principal.owner_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use crate::model::Business;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotline_test_resolver");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    const KEY: &str = "0123456789abcdef-key";

    async fn setup(name: &str, businesses: usize) -> (Engine, Ulid, Vec<Ulid>) {
        let engine = Engine::new(test_wal_path(name), Arc::new(NotifyHub::new(8)), EngineOptions::default()).unwrap();
        let owner = Ulid::new();
        engine.create_owner(owner, KEY.into()).await.unwrap();
        let mut ids = Vec::new();
        for i in 0..businesses {
            let id = Ulid::new();
            engine
                .create_business(Business {
                    id,
                    owner_id: owner,
                    name: format!("Shop {i}"),
                    contact_email: None,
                })
                .await
                .unwrap();
            ids.push(id);
        }
        (engine, owner, ids)
    }

    fn credential(owner_id: Ulid, api_key: &str, business_id: Option<Ulid>) -> RequestContext {
        RequestContext::Credential {
            owner_id,
            api_key: api_key.into(),
            business_id,
        }
    }

    #[tokio::test]
    async fn trusted_context_must_exist() {
        let (engine, _, ids) = setup("trusted.wal", 1).await;
        assert_eq!(resolve(&engine, &RequestContext::Trusted { business_id: ids[0] }).unwrap(), ids[0]);
        let missing = Ulid::new();
        assert!(matches!(
            resolve(&engine, &RequestContext::Trusted { business_id: missing }),
            Err(EngineError::NotFound("business", id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn single_business_owner_resolves() {
        let (engine, owner, ids) = setup("single.wal", 1).await;
        assert_eq!(resolve(&engine, &credential(owner, KEY, None)).unwrap(), ids[0]);
        assert_eq!(resolve(&engine, &credential(owner, KEY, Some(ids[0]))).unwrap(), ids[0]);
    }

    #[tokio::test]
    async fn wrong_key_is_auth_failure() {
        let (engine, owner, _) = setup("wrong_key.wal", 1).await;
        assert!(matches!(
            resolve(&engine, &credential(owner, "0123456789abcdef-kez", None)),
            Err(EngineError::AuthFailure(_))
        ));
        assert!(matches!(
            resolve(&engine, &credential(Ulid::new(), KEY, None)),
            Err(EngineError::AuthFailure(_))
        ));
    }

    #[tokio::test]
    async fn several_businesses_need_a_name() {
        let (engine, owner, ids) = setup("several.wal", 2).await;
        assert!(matches!(
            resolve(&engine, &credential(owner, KEY, None)),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(resolve(&engine, &credential(owner, KEY, Some(ids[1]))).unwrap(), ids[1]);
    }

    #[tokio::test]
    async fn unowned_business_is_refused() {
        let (engine, owner, _) = setup("unowned.wal", 1).await;
        let (other_engine_owner, other) = (Ulid::new(), Ulid::new());
        engine.create_owner(other_engine_owner, "another-owner-key-99".into()).await.unwrap();
        engine
            .create_business(Business {
                id: other,
                owner_id: other_engine_owner,
                name: "Elsewhere".into(),
                contact_email: None,
            })
            .await
            .unwrap();
        assert!(matches!(
            resolve(&engine, &credential(owner, KEY, Some(other))),
            Err(EngineError::AuthFailure(_))
        ));
    }

    #[tokio::test]
    async fn owner_without_business_is_not_found() {
        let (engine, owner, _) = setup("no_business.wal", 0).await;
        assert!(matches!(
            resolve(&engine, &credential(owner, KEY, None)),
            Err(EngineError::NotFound(..))
        ));
    }

    #[tokio::test]
    async fn anonymous_is_refused() {
        let (engine, _, _) = setup("anonymous.wal", 1).await;
        assert!(matches!(
            resolve(&engine, &RequestContext::Anonymous),
            Err(EngineError::AuthFailure(_))
        ));
    }
}
