//! Caddyfile rendering

use std::fmt::Write;
use std::path::PathBuf;

use crate::models::Proxy;

const WAF_BLOCK: &str = "    coraza_waf {
        load_owasp_crs
        directives `
            Include @coraza.conf-recommended
            Include @crs-setup.conf.example
            Include @owasp_crs/*.conf
            SecRuleEngine On
        `
    }
";

/// Paths on the agent domain forwarded to the local agent
pub const CONTROL_PATHS: [&str; 3] = ["/hey", "/deploy/*", "/join/*"];

/// Fixed parts of the edge configuration
#[derive(Debug, Clone)]
pub struct ControlRoutes {
    /// Public domain of this agent; `/hey`, `/deploy/*` and `/join/*` are forwarded to it
    pub agent_domain: Option<String>,
    pub agent_port: u16,

    /// VPN-internal site proxied to the agent
    pub vpn_domain: Option<String>,
    pub vpn_tls: Option<(PathBuf, PathBuf)>,

    /// Prepend the Coraza WAF to every site
    pub waf: bool,
}

impl Default for ControlRoutes {
    fn default() -> Self {
        Self {
            agent_domain: None,
            agent_port: 5445,
            vpn_domain: None,
            vpn_tls: None,
            waf: false,
        }
    }
}

/// One public domain and every upstream serving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub domain: String,
    pub upstreams: Vec<String>,
}

/// Group proxy rows by domain, keeping the order in which domains first appear
pub fn group_routes(proxies: &[Proxy]) -> Vec<Route> {
    let mut routes: Vec<Route> = Vec::new();
    for proxy in proxies {
        let upstream = proxy.upstream();
        match routes.iter_mut().find(|r| r.domain == proxy.domain) {
            Some(route) => {
                if !route.upstreams.contains(&upstream) {
                    route.upstreams.push(upstream);
                }
            }
            None => routes.push(Route {
                domain: proxy.domain.clone(),
                upstreams: vec![upstream],
            }),
        }
    }
    routes
}

fn open_site(out: &mut String, address: &str, waf: bool) {
    let _ = writeln!(out, "{} {{", address);
    if waf {
        out.push_str(WAF_BLOCK);
    }
}

/// Render a complete Caddyfile
pub fn render(control: &ControlRoutes, routes: &[Route]) -> String {
    let mut out = String::new();

    if control.waf {
        out.push_str("{\n    order coraza_waf first\n}\n\n");
    }

    if let Some(domain) = &control.agent_domain {
        open_site(&mut out, domain, control.waf);
        // handle blocks are mutually exclusive, so abort only sees unmatched paths
        for path in CONTROL_PATHS {
            let _ = writeln!(
                out,
                "    handle {} {{\n        reverse_proxy localhost:{}\n    }}",
                path, control.agent_port
            );
        }
        out.push_str("    handle {\n        abort\n    }\n}\n\n");
    }

    if let Some(domain) = &control.vpn_domain {
        open_site(&mut out, domain, control.waf);
        let _ = writeln!(out, "    reverse_proxy * localhost:{}", control.agent_port);
        if let Some((cert, key)) = &control.vpn_tls {
            let _ = writeln!(out, "    tls {} {}", cert.display(), key.display());
        }
        out.push_str("}\n\n");
    }

    for route in routes {
        open_site(&mut out, &route.domain, control.waf);
        let _ = writeln!(out, "    reverse_proxy * {}", route.upstreams.join(" "));
        out.push_str("}\n\n");
    }

    out
}
