//! `sgate route`: show the routing decision for a query.

use anyhow::Result;
use skillgate_core::router::RouteRequest;

use super::RoutingArgs;
use super::render;
use crate::state::AppState;

/// Build a [`RouteRequest`] from the shared routing flags.
pub fn route_request(query: &str, args: &RoutingArgs) -> RouteRequest {
    let mut request = RouteRequest::new(query)
        .with_tags(args.tags.iter().cloned())
        .include_deprecated(args.include_deprecated);
    if let Some(mode) = args.mode {
        request = request.with_mode(mode);
    }
    request
}

pub async fn route(state: &AppState, query: &str, args: &RoutingArgs, json: bool) -> Result<()> {
    let request = route_request(query, args);
    let decision = state.orchestrator.route(&args.tenant, &request);

    if json {
        return render::print_json(&decision);
    }
    render::routing_decision(&decision);
    Ok(())
}
