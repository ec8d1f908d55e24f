//! Server discovery through the locate (mlab-ns) web service.
//!
//! One HTTP GET returns either a single `{"fqdn": ...}` object or, under
//! the geo-options policy, an array of them; every returned FQDN is a
//! candidate server the caller may try in order.

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::settings::{MlabnsPolicy, ProtocolFlags, Settings};

/// Tool segment of the locate URL for the configured protocol.
fn tool_segment(flags: ProtocolFlags) -> &'static str {
    if flags.contains(ProtocolFlags::NDT7) {
        "ndt7"
    } else if flags.contains(ProtocolFlags::TLS) {
        "ndt_ssl"
    } else {
        "ndt"
    }
}

/// Query-string suffix selecting the policy.
fn policy_query(policy: MlabnsPolicy) -> &'static str {
    match policy {
        MlabnsPolicy::Closest => "",
        MlabnsPolicy::Random => "?policy=random",
        MlabnsPolicy::GeoOptions => "?policy=geo_options",
    }
}

/// The full locate URL for these settings.
pub fn locate_url(settings: &Settings) -> String {
    format!(
        "{}/{}{}",
        settings.mlabns_base_url,
        tool_segment(settings.protocol_flags),
        policy_query(settings.mlabns_policy)
    )
}

/// Extract the candidate FQDNs from a locate response body.
pub fn parse_fqdns(body: &str, policy: MlabnsPolicy) -> Result<Vec<String>, ErrorKind> {
    let parsed: serde_json::Value = serde_json::from_str(body).map_err(|_| ErrorKind::Io)?;
    let mut fqdns = Vec::new();
    if policy == MlabnsPolicy::GeoOptions {
        let entries = parsed.as_array().ok_or(ErrorKind::Io)?;
        for entry in entries {
            let fqdn = entry
                .get("fqdn")
                .and_then(|v| v.as_str())
                .ok_or(ErrorKind::Io)?;
            fqdns.push(fqdn.to_string());
        }
    } else {
        let fqdn = parsed
            .get("fqdn")
            .and_then(|v| v.as_str())
            .ok_or(ErrorKind::Io)?;
        fqdns.push(fqdn.to_string());
    }
    if fqdns.is_empty() {
        return Err(ErrorKind::Io);
    }
    Ok(fqdns)
}

/// Discover candidate servers for the configured protocol and policy.
pub async fn discover(settings: &Settings, emit: &Emitter) -> Result<Vec<String>, ErrorKind> {
    let url = locate_url(settings);
    emit.debug(&format!("querying locate service: {url}"));

    let mut builder = reqwest::Client::builder().timeout(settings.timeout);
    if let Some(port) = settings.socks5h_port {
        let proxy = reqwest::Proxy::all(format!("socks5h://127.0.0.1:{port}"))
            .map_err(|_| ErrorKind::InvalidArgument)?;
        builder = builder.proxy(proxy);
    }
    let client = builder.build().map_err(|_| ErrorKind::Io)?;

    let response = client.get(&url).send().await.map_err(|e| {
        emit.warning(&format!("locate query failed: {e}"));
        ErrorKind::Io
    })?;
    let response = response.error_for_status().map_err(|e| {
        emit.warning(&format!("locate query failed: {e}"));
        ErrorKind::Io
    })?;
    let body = response.text().await.map_err(|_| ErrorKind::Io)?;

    let fqdns = parse_fqdns(&body, settings.mlabns_policy).map_err(|kind| {
        emit.warning("cannot parse the locate service response");
        kind
    })?;
    for fqdn in &fqdns {
        emit.info(&format!("discovered server: {fqdn}"));
    }
    Ok(fqdns)
}
