// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Renders a decrypted [`ProxyConfig`] into the ProxySQL admin config text
//! written to the ConfigMap (§4.5).

use chester_core::ProxyConfig;

/// Produces the `proxysql.cnf` body. Credentials must already be decrypted
/// by the caller; this function never sees ciphertext.
pub fn render_proxysql_cnf(config: &ProxyConfig, password: &str) -> String {
    let mut out = String::new();
    out.push_str("mysql_servers =\n(\n");
    for server in &config.mysql_servers {
        out.push_str(&format!(
            "  {{ address=\"{}\" , port={} , hostgroup={}, max_connections={}, ssl={}, comment=\"{}\" }},\n",
            server.address,
            server.port,
            server.hostgroup,
            server.max_connections,
            if server.use_ssl { 1 } else { 0 },
            server.comment,
        ));
    }
    out.push_str(")\n\n");

    out.push_str("mysql_query_rules =\n(\n");
    out.push_str(&format!(
        "  {{ active=1, match_pattern=\"^SELECT.*\", destination_hostgroup={}, apply=1 }},\n",
        config.read_host_group
    ));
    out.push_str(")\n\n");

    out.push_str("mysql_users =\n(\n");
    out.push_str(&format!(
        "  {{ username=\"{}\" , password=\"{}\" , default_hostgroup={} }},\n",
        config.username, password, config.write_host_group
    ));
    out.push_str(")\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chester_core::ProxySqlServer;

    #[test]
    fn renders_servers_users_and_query_rules() {
        let mut config = ProxyConfig::new("db-a");
        config.username = "chester".to_string();
        config.mysql_servers.push(ProxySqlServer::daemon_owned("10.0.0.7", 1, true));

        let rendered = render_proxysql_cnf(&config, "hunter2");

        assert!(rendered.contains("address=\"10.0.0.7\""));
        assert!(rendered.contains("hostgroup=1"));
        assert!(rendered.contains("username=\"chester\""));
        assert!(rendered.contains("password=\"hunter2\""));
    }
}
