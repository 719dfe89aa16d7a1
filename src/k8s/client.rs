// Client creation with custom user-agent support for kube 2.x
use crate::error::Result;
use hyper::http::{HeaderName, HeaderValue};
use kube::{Client, Config};
use tracing::warn;

/// Adds a `user-agent` header to `config`. Invalid header values are logged
/// and skipped so the default kube user agent stays in place.
pub fn add_user_agent_header(config: &mut Config, user_agent: Option<&str>) {
    let Some(user_agent) = user_agent else {
        return;
    };

    match HeaderValue::from_str(user_agent) {
        Ok(value) => config
            .headers
            .push((HeaderName::from_static("user-agent"), value)),
        Err(e) => warn!("Ignoring invalid user agent {:?}: {}", user_agent, e),
    }
}

/// Create a new k8s client to interact with k8s cluster api
///
/// # Errors
///
/// Will return `Err` if no kube config can be inferred or the client cannot
/// be built from it
pub async fn new(custom_user_agent: Option<&str>) -> Result<Client> {
    let mut config = Config::infer().await?;
    add_user_agent_header(&mut config, custom_user_agent);

    Ok(Client::try_from(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new("https://127.0.0.1:6443".parse().unwrap())
    }

    #[test]
    fn test_user_agent_header_added() {
        let mut config = config();
        add_user_agent_header(&mut config, Some("navisync/1.0"));
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].1, "navisync/1.0");
    }

    #[test]
    fn test_invalid_user_agent_skipped() {
        let mut config = config();
        add_user_agent_header(&mut config, Some("\u{007F}InvalidAgent"));
        add_user_agent_header(&mut config, None);
        assert!(config.headers.is_empty());
    }
}
