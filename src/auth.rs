use super::*;

/// What the authorization policy decided about a worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AuthResult {
    pub(crate) authorized: bool,
    /// Tear the socket down instead of answering.
    pub(crate) disconnect: bool,
    /// A difficulty the policy wants this worker pinned to.
    pub(crate) difficulty: Option<f64>,
}

impl AuthResult {
    pub(crate) fn allow() -> Self {
        Self {
            authorized: true,
            disconnect: false,
            difficulty: None,
        }
    }
}

/// Pool-operator authorization policy. The pool core only ever sees this
/// interface; what counts as a valid worker name is the operator's business.
#[async_trait]
pub(crate) trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        port: u16,
        worker: &str,
        password: Option<&str>,
        remote: IpAddr,
    ) -> AuthResult;
}

/// The default policy: every worker mines.
pub(crate) struct AcceptAll;

#[async_trait]
impl Authorizer for AcceptAll {
    async fn authorize(
        &self,
        _port: u16,
        worker: &str,
        _password: Option<&str>,
        remote: IpAddr,
    ) -> AuthResult {
        debug!("authorizing {worker} from {remote}");
        AuthResult::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_all_authorizes_anyone() {
        let result = AcceptAll
            .authorize(3333, "wallet.rig0", None, IpAddr::from([127, 0, 0, 1]))
            .await;

        assert_eq!(result, AuthResult::allow());
        assert!(result.authorized);
        assert!(!result.disconnect);
        assert_eq!(result.difficulty, None);
    }
}
