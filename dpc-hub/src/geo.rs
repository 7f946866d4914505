//! Geographic gating (spec §6): an optional middleware that consults a
//! GeoIP database and returns `451 Unavailable For Legal Reasons` for
//! requests originating from a configured list of country codes.
//!
//! The GeoIP database itself is out of scope (spec §1 only asks for the
//! contract) — [`GeoIpLookup`] is the capability trait the binary wires to
//! whatever database it has (MaxMind, a flat file, …); this crate only
//! implements the gating decision and the axum layer around it.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

/// Resolves a client IP to an ISO 3166-1 alpha-2 country code.
pub trait GeoIpLookup: Send + Sync {
    fn country_code(&self, ip: IpAddr) -> Option<String>;
}

/// Gating configuration: the set of blocked country codes and the lookup
/// used to resolve an incoming connection's country.
pub struct GeoGate {
    pub lookup: Arc<dyn GeoIpLookup>,
    pub blocked_countries: Vec<String>,
}

impl GeoGate {
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        match self.lookup.country_code(ip) {
            Some(code) => self.blocked_countries.iter().any(|blocked| blocked.eq_ignore_ascii_case(&code)),
            None => false,
        }
    }
}

/// Middleware that 451s requests from a blocked country before they reach
/// any handler. Absent from the router entirely when no gate is configured
/// (this layer is only installed when the binary opts in).
pub async fn geo_gate_layer(
    State(gate): State<Arc<GeoGate>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if gate.is_blocked(addr.ip()) {
        return StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLookup(Option<&'static str>);
    impl GeoIpLookup for FixedLookup {
        fn country_code(&self, _ip: IpAddr) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn blocks_a_configured_country() {
        let gate = GeoGate { lookup: Arc::new(FixedLookup(Some("KP"))), blocked_countries: vec!["KP".to_string()] };
        assert!(gate.is_blocked("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn allows_an_unlisted_country() {
        let gate = GeoGate { lookup: Arc::new(FixedLookup(Some("US"))), blocked_countries: vec!["KP".to_string()] };
        assert!(!gate.is_blocked("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn allows_when_lookup_cannot_resolve_a_country() {
        let gate = GeoGate { lookup: Arc::new(FixedLookup(None)), blocked_countries: vec!["KP".to_string()] };
        assert!(!gate.is_blocked("1.2.3.4".parse().unwrap()));
    }
}
