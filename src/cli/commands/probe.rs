//! Probe command implementation.

use crate::xds::grpc::RouteDiscoveryClient;
use crate::xds::proto::{ApiVersion, DiscoveryRequest, DiscoveryResponse, Node, RouteConfiguration};
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::time::Duration;

/// Subscribe to a running server and print what it pushes.
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Server endpoint.
    #[arg(long, default_value = "http://127.0.0.1:9876")]
    pub endpoint: String,

    /// Node id to present.
    #[arg(long)]
    pub node_id: String,

    /// Node cluster to present.
    #[arg(long, default_value = "probe")]
    pub node_cluster: String,

    /// Discovery API version.
    #[arg(long, value_enum, default_value = "v3")]
    pub api: ProbeApi,

    /// Number of pushes to print before exiting.
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// Seconds to wait for each push.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProbeApi {
    V2,
    V3,
}

impl From<ProbeApi> for ApiVersion {
    fn from(api: ProbeApi) -> Self {
        match api {
            ProbeApi::V2 => ApiVersion::V2,
            ProbeApi::V3 => ApiVersion::V3,
        }
    }
}

/// Open a stream, print `count` pushes, acknowledging each.
pub async fn run_probe(args: ProbeArgs) -> Result<()> {
    let api = ApiVersion::from(args.api);
    let node = Node {
        id: args.node_id.clone(),
        cluster: args.node_cluster.clone(),
    };

    let mut client = RouteDiscoveryClient::connect(args.endpoint.clone(), api)
        .await
        .with_context(|| format!("failed to connect to {}", args.endpoint))?;
    let mut subscription = client
        .subscribe(DiscoveryRequest {
            node: Some(node.clone()),
            type_url: api.route_type_url().to_string(),
            ..Default::default()
        })
        .await
        .context("stream rejected")?;

    let wait = Duration::from_secs(args.timeout_secs);
    for _ in 0..args.count {
        let response = tokio::time::timeout(wait, subscription.next_response())
            .await
            .context("timed out waiting for route configuration")?
            .context("stream failed")?
            .context("server closed the stream")?;

        print!("{}", describe(&response)?);
        if !subscription.ack(&node, &response).await {
            anyhow::bail!("stream closed before acknowledgement");
        }
    }
    Ok(())
}

fn describe(response: &DiscoveryResponse) -> Result<String> {
    let mut out = format!(
        "version={} nonce={} type_url={}\n",
        response.version_info, response.nonce, response.type_url
    );
    for resource in &response.resources {
        let config: RouteConfiguration = resource
            .unpack()
            .context("undecodable route configuration")?;
        out.push_str(&format!(
            "  route_configuration {} ({} virtual hosts)\n",
            config.name,
            config.virtual_hosts.len()
        ));
        for vhost in &config.virtual_hosts {
            for route in &vhost.routes {
                let prefix = route
                    .r#match
                    .as_ref()
                    .and_then(|m| m.prefix.as_deref())
                    .unwrap_or("");
                let cluster = route
                    .route
                    .as_ref()
                    .and_then(|r| r.cluster.as_deref())
                    .unwrap_or("");
                out.push_str(&format!(
                    "    {} [{}] {} -> {}\n",
                    vhost.name,
                    vhost.domains.join(","),
                    prefix,
                    cluster
                ));
            }
        }
    }
    Ok(out)
}
