use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::cache::{CachedSubscription, RedisCache};
use crate::db;
use crate::models::{Account, Inbound, InboundConfig, InboundFingerPrint, InboundSecurity, InboundType};

const DEFAULT_SS_METHOD: &str = "chacha20-ietf-poly1305";

/// Inbound config together with the inbound it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedConfig {
    pub config: InboundConfig,
    pub inbound: Option<Inbound>,
}

/// Public URL of an account's subscription bundle
pub fn subscription_url(base_url: &str, uuid: &Uuid) -> String {
    format!("{}/sub/{}", base_url.trim_end_matches('/'), uuid)
}

fn encode_component(value: &str) -> String {
    // byte_serialize writes spaces as '+' and escapes literal '+'
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Resolved connection parameters shared by every link format
struct Endpoint<'a> {
    address: &'a str,
    port: i32,
    remark: String,
    host: Option<&'a str>,
    sni: Option<&'a str>,
}

fn resolve_endpoint<'a>(config: &'a InboundConfig, inbound: Option<&'a Inbound>) -> Option<Endpoint<'a>> {
    let domain = non_empty(&config.domain);
    let address = non_empty(&config.address).or(domain)?;
    let port = config.port.or(inbound.map(|i| i.port)).filter(|p| *p > 0)?;
    let remark = non_empty(&config.remark)
        .map(str::to_string)
        .or_else(|| inbound.map(|i| i.remark.clone()))
        .unwrap_or_else(|| address.to_string());

    Some(Endpoint {
        address,
        port,
        remark,
        host: non_empty(&config.host).or(domain),
        sni: non_empty(&config.sni).or(domain),
    })
}

fn query_string(config: &InboundConfig, endpoint: &Endpoint<'_>, extra: &[(&str, &str)]) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in extra {
        query.append_pair(k, v);
    }
    query.append_pair("type", config.network.as_ref());
    if config.security != InboundSecurity::Default {
        query.append_pair("security", config.security.as_ref());
    }
    if let Some(path) = non_empty(&config.path) {
        query.append_pair("path", path);
    }
    if let Some(host) = endpoint.host {
        query.append_pair("host", host);
    }
    if let Some(sni) = endpoint.sni {
        query.append_pair("sni", sni);
    }
    if config.finger_print != InboundFingerPrint::Default {
        query.append_pair("fp", config.finger_print.as_ref());
    }
    for (key, value) in [("pbk", &config.pbk), ("sid", &config.sid), ("spx", &config.spx)] {
        if let Some(value) = non_empty(value) {
            query.append_pair(key, value);
        }
    }
    if let Some(alpns) = config.alpns.as_ref().filter(|a| !a.is_empty()) {
        query.append_pair("alpn", &alpns.join(","));
    }
    query.finish()
}

fn vmess_link(config: &InboundConfig, endpoint: &Endpoint<'_>, account: &Account) -> String {
    let tls = match config.security {
        InboundSecurity::Tls | InboundSecurity::Reality => config.security.as_ref(),
        _ => "",
    };
    let payload = serde_json::json!({
        "v": "2",
        "ps": endpoint.remark,
        "add": endpoint.address,
        "port": endpoint.port.to_string(),
        "id": account.uuid.to_string(),
        "aid": "0",
        "scy": "auto",
        "net": config.network.as_ref(),
        "type": "none",
        "host": endpoint.host.unwrap_or_default(),
        "path": non_empty(&config.path).unwrap_or_default(),
        "tls": tls,
        "sni": endpoint.sni.unwrap_or_default(),
        "alpn": config.alpns.as_ref().map(|a| a.join(",")).unwrap_or_default(),
        "fp": if config.finger_print == InboundFingerPrint::Default { "" } else { config.finger_print.as_ref() },
    });

    format!("vmess://{}", STANDARD.encode(payload.to_string()))
}

/// Cipher for shadowsocks links, overridable through `extra.method`
fn shadowsocks_method(config: &InboundConfig) -> String {
    non_empty(&config.extra)
        .and_then(|extra| serde_json::from_str::<HashMap<String, serde_json::Value>>(extra).ok())
        .and_then(|extra| extra.get("method").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_SS_METHOD.to_string())
}

/// Share link for one config, `None` when the config is not published or
/// lacks an address or port
pub fn render_link(config: &InboundConfig, inbound: Option<&Inbound>, account: &Account) -> Option<String> {
    if !config.is_published(inbound) {
        return None;
    }
    let endpoint = resolve_endpoint(config, inbound)?;
    let remark = encode_component(&endpoint.remark);

    let link = match config.effective_type(inbound) {
        InboundType::Vless | InboundType::Default => format!(
            "vless://{}@{}:{}?{}#{}",
            account.uuid,
            endpoint.address,
            endpoint.port,
            query_string(config, &endpoint, &[("encryption", "none")]),
            remark
        ),
        InboundType::Trojan => format!(
            "trojan://{}@{}:{}?{}#{}",
            account.uuid,
            endpoint.address,
            endpoint.port,
            query_string(config, &endpoint, &[]),
            remark
        ),
        InboundType::Vmess => vmess_link(config, &endpoint, account),
        InboundType::Shadowsocks => {
            let user_info = STANDARD.encode(format!("{}:{}", shadowsocks_method(config), account.uuid));
            format!("ss://{}@{}:{}#{}", user_info, endpoint.address, endpoint.port, remark)
        }
    };

    Some(link)
}

/// Base64 bundle understood by v2ray-style clients
pub fn render_subscription(links: &[String]) -> String {
    STANDARD.encode(links.join("\n"))
}

/// Value of the `subscription-userinfo` response header
pub fn subscription_userinfo(account: &Account) -> String {
    format!(
        "upload=0; download={}; total={}; expire={}",
        account.used_traffic.max(0),
        account.data_limit.max(0),
        account.expired_at.map(|at| at.timestamp()).unwrap_or(0)
    )
}

/// Published configs joined with their inbounds, served from cache when possible
pub async fn published_configs(pool: &PgPool, cache: &RedisCache) -> Result<Vec<PublishedConfig>> {
    match cache.get_published_configs::<Vec<PublishedConfig>>().await {
        Ok(Some(configs)) => return Ok(configs),
        Ok(None) => {}
        Err(e) => tracing::warn!("Published config cache unavailable: {}", e),
    }

    let inbounds: HashMap<i64, Inbound> = db::list_inbounds(pool)
        .await?
        .into_iter()
        .map(|i| (i.id, i))
        .collect();
    let configs: Vec<PublishedConfig> = db::list_enabled_inbound_configs(pool)
        .await?
        .into_iter()
        .map(|config| PublishedConfig {
            inbound: config.inbound_id.and_then(|id| inbounds.get(&id).cloned()),
            config,
        })
        .filter(|p| p.config.is_published(p.inbound.as_ref()))
        .collect();

    if let Err(e) = cache.cache_published_configs(&configs).await {
        tracing::warn!("Failed to cache published configs: {}", e);
    }

    Ok(configs)
}

pub fn build_subscription(account: &Account, configs: &[PublishedConfig]) -> CachedSubscription {
    let links: Vec<String> = if account.is_active(Utc::now()) {
        configs
            .iter()
            .filter_map(|p| render_link(&p.config, p.inbound.as_ref(), account))
            .collect()
    } else {
        Vec::new()
    };

    CachedSubscription {
        body: render_subscription(&links),
        userinfo: subscription_userinfo(account),
    }
}

/// Bundle for `GET /sub/:uuid`; `None` for unknown accounts
pub async fn subscription_for(pool: &PgPool, cache: &RedisCache, uuid: Uuid) -> Result<Option<CachedSubscription>> {
    match cache.get_subscription(&uuid).await {
        Ok(Some(cached)) => return Ok(Some(cached)),
        Ok(None) => {}
        Err(e) => tracing::warn!("Subscription cache unavailable: {}", e),
    }

    let Some(account) = db::get_account_by_uuid(pool, uuid).await? else {
        return Ok(None);
    };

    let configs = published_configs(pool, cache).await?;
    let subscription = build_subscription(&account, &configs);

    if let Err(e) = cache.cache_subscription(&uuid, &subscription).await {
        tracing::warn!("Failed to cache subscription: {}", e);
    }

    Ok(Some(subscription))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InboundNetwork, JsonList};
    use chrono::{Duration, TimeZone};

    fn account() -> Account {
        Account {
            id: 1,
            user_id: 1,
            service_id: 1,
            uuid: Uuid::parse_str("0b5f2a0e-6c36-4b59-9d43-3f2cb3a1d001").unwrap(),
            email: "1_1".to_string(),
            service_title: None,
            user_title: None,
            data_limit: 1000,
            used_traffic: 250,
            expired_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            enable: true,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn inbound(protocol: &str) -> Inbound {
        Inbound {
            id: 1,
            remark: "Frankfurt".to_string(),
            key: "de-1".to_string(),
            protocol: protocol.to_string(),
            port: 8443,
            enable: true,
            develop: false,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn config() -> InboundConfig {
        InboundConfig {
            id: 1,
            inbound_id: Some(1),
            remark: Some("DE Fast".to_string()),
            port: Some(443),
            domain: Some("de.example.com".to_string()),
            host: None,
            sni: None,
            address: None,
            path: Some("/ws".to_string()),
            pbk: None,
            sid: None,
            spx: None,
            enable: true,
            develop: false,
            finger_print: InboundFingerPrint::Chrome,
            security: InboundSecurity::Tls,
            network: InboundNetwork::Ws,
            alpns: Some(JsonList(vec!["h2".to_string(), "http/1.1".to_string()])),
            config_type: InboundType::Default,
            config_mode: "auto".to_string(),
            extra: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_vless_link_with_fallbacks() {
        let link = render_link(&config(), Some(&inbound("vless")), &account()).unwrap();
        assert_eq!(
            link,
            "vless://0b5f2a0e-6c36-4b59-9d43-3f2cb3a1d001@de.example.com:443\
             ?encryption=none&type=ws&security=tls&path=%2Fws&host=de.example.com\
             &sni=de.example.com&fp=chrome&alpn=h2%2Chttp%2F1.1#DE%20Fast"
        );
    }

    #[test]
    fn test_address_and_port_precedence() {
        let mut cfg = config();
        cfg.address = Some("1.2.3.4".to_string());
        cfg.port = None;
        cfg.security = InboundSecurity::Default;
        cfg.finger_print = InboundFingerPrint::Default;
        cfg.alpns = None;
        cfg.config_type = InboundType::Trojan;

        let link = render_link(&cfg, Some(&inbound("vless")), &account()).unwrap();
        assert!(link.starts_with("trojan://0b5f2a0e-6c36-4b59-9d43-3f2cb3a1d001@1.2.3.4:8443?type=ws&path="));
        assert!(!link.contains("security="));
        assert!(!link.contains("fp="));
    }

    #[test]
    fn test_vmess_link_is_base64_json() {
        let link = render_link(&config(), Some(&inbound("vmess")), &account()).unwrap();
        let payload = link.strip_prefix("vmess://").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!(json["v"], "2");
        assert_eq!(json["add"], "de.example.com");
        assert_eq!(json["port"], "443");
        assert_eq!(json["id"], "0b5f2a0e-6c36-4b59-9d43-3f2cb3a1d001");
        assert_eq!(json["net"], "ws");
        assert_eq!(json["tls"], "tls");
        assert_eq!(json["ps"], "DE Fast");
    }

    #[test]
    fn test_shadowsocks_link_uses_extra_method() {
        let mut cfg = config();
        cfg.config_type = InboundType::Shadowsocks;
        cfg.extra = Some(r#"{"method": "aes-256-gcm"}"#.to_string());

        let link = render_link(&cfg, None, &account()).unwrap();
        let expected_user = STANDARD.encode("aes-256-gcm:0b5f2a0e-6c36-4b59-9d43-3f2cb3a1d001");
        assert_eq!(link, format!("ss://{}@de.example.com:443#DE%20Fast", expected_user));
    }

    #[test]
    fn test_unpublished_or_incomplete_configs_are_skipped() {
        let mut disabled = config();
        disabled.enable = false;
        assert!(render_link(&disabled, None, &account()).is_none());

        let mut dev_inbound = inbound("vless");
        dev_inbound.develop = true;
        assert!(render_link(&config(), Some(&dev_inbound), &account()).is_none());

        let mut no_address = config();
        no_address.domain = None;
        assert!(render_link(&no_address, None, &account()).is_none());

        let mut no_port = config();
        no_port.port = None;
        assert!(render_link(&no_port, None, &account()).is_none());
    }

    #[test]
    fn test_render_subscription_bundle() {
        let links = vec!["vless://a".to_string(), "trojan://b".to_string()];
        let bundle = render_subscription(&links);
        assert_eq!(STANDARD.decode(bundle).unwrap(), b"vless://a\ntrojan://b");
        assert_eq!(render_subscription(&[]), "");
    }

    #[test]
    fn test_subscription_userinfo() {
        let acc = account();
        assert_eq!(
            subscription_userinfo(&acc),
            format!("upload=0; download=250; total=1000; expire={}", acc.expired_at.unwrap().timestamp())
        );

        let mut unlimited = account();
        unlimited.data_limit = 0;
        unlimited.expired_at = None;
        assert_eq!(subscription_userinfo(&unlimited), "upload=0; download=250; total=0; expire=0");
    }

    #[test]
    fn test_inactive_account_gets_empty_bundle() {
        let configs = vec![PublishedConfig { config: config(), inbound: Some(inbound("vless")) }];

        let active = build_subscription(&account(), &configs);
        assert!(!active.body.is_empty());

        let mut expired = account();
        expired.expired_at = Some(Utc::now() - Duration::days(1));
        let bundle = build_subscription(&expired, &configs);
        assert_eq!(bundle.body, "");
        assert!(bundle.userinfo.starts_with("upload=0; download=250"));
    }

    #[test]
    fn test_subscription_url() {
        let uuid = account().uuid;
        assert_eq!(
            subscription_url("https://sub.example.com/", &uuid),
            "https://sub.example.com/sub/0b5f2a0e-6c36-4b59-9d43-3f2cb3a1d001"
        );
    }
}
