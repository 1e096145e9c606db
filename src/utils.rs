use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Creates a truncated, salted hash of an identifier for safe logging.
///
/// # Arguments
/// * `id` - The identifier to hash (e.g., sender email, client IP).
/// * `salt` - A salt value from the application's configuration.
///
/// # Returns
/// A short, hexadecimal string representing the salted hash.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    // Take first 4 bytes and format each as hex
    hash[..4]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

/// Extracts client IP address from HTTP request headers
///
/// Checks headers in order of priority:
/// 1. X-Forwarded-For (first IP in the chain, if present)
/// 2. X-Real-IP (single IP, if present)
/// 3. Falls back to provided direct IP (from connection)
///
/// # Security Note
/// X-Forwarded-For can be spoofed by clients, so it should only be trusted
/// if the request comes through a trusted proxy/load balancer.
/// In production, ensure your reverse proxy (Caddy, nginx, etc.) sets these
/// headers and strips any existing X-Forwarded-For from untrusted sources.
///
/// # Returns
/// IP address as a string, or the "unknown" sentinel when no identity is
/// derivable. The rate limiter stays engaged for "unknown" rather than
/// skipping the check, so identity-less traffic shares one coarse bucket.
pub fn extract_client_ip(headers: &axum::http::HeaderMap, direct_ip: Option<IpAddr>) -> String {
    // 1. Check X-Forwarded-For (first IP in chain)
    if let Some(forwarded_for) = headers.get("x-forwarded-for")
        && let Ok(forwarded_str) = forwarded_for.to_str()
    {
        // X-Forwarded-For can contain multiple IPs: "client, proxy1, proxy2"
        // We want the first (original client) IP
        let first_ip = forwarded_str.split(',').next().unwrap_or("").trim();
        if !first_ip.is_empty()
            && let Ok(ip) = first_ip.parse::<IpAddr>()
        {
            return normalize_ip(ip);
        }
    }

    // 2. Check X-Real-IP (single IP, often set by nginx)
    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(real_ip_str) = real_ip.to_str()
        && let Ok(ip) = real_ip_str.trim().parse::<IpAddr>()
    {
        return normalize_ip(ip);
    }

    // 3. Fallback to direct connection IP
    if let Some(ip) = direct_ip {
        return normalize_ip(ip);
    }

    // 4. Last resort: constant sentinel (shouldn't happen in production)
    "unknown".to_string()
}

/// Normalizes IP address to string format (removes brackets for IPv6)
fn normalize_ip(ip: IpAddr) -> String {
    let ip_str = ip.to_string();
    // Remove brackets if present (e.g., "[::1]" -> "::1")
    ip_str
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}

/// Removes markup tags from user-provided text.
///
/// Anything between `<` and the matching `>` is dropped; an unterminated
/// `<` drops the rest of the string. The result is whitespace-normalized so
/// stripped tags don't leave double spaces behind.
pub fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;

    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    // Collapse runs of whitespace left behind by removed tags
    let mut normalized = String::with_capacity(out.len());
    let mut last_was_space = false;
    for c in out.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                normalized.push(' ');
            }
            last_was_space = true;
        } else {
            normalized.push(c);
            last_was_space = false;
        }
    }
    normalized
}
