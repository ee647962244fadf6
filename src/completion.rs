use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cache::{CompletionCache, INSTANCES_TTL, PLANS_TTL, REGIONS_TTL, VPCS_TTL};
use crate::client::{Client, Instance, Plan, Region, Vpc};
use crate::config::CredentialStore;

/// Candidate lists for shell completion, one `value<TAB>description` line per
/// entry. Failures of any kind produce an empty list; completion must never
/// prompt, retry, or print errors mid-keystroke.
pub fn instance_candidates(store: &CredentialStore, cache: &CompletionCache) -> Vec<String> {
    cached_fetch(store, cache, "instances", INSTANCES_TTL, Client::list_instances)
        .map(|instances: Vec<Instance>| {
            instances
                .iter()
                .map(|instance| format!("{}\t{}", instance.id, instance.name))
                .collect()
        })
        .unwrap_or_default()
}

pub fn plan_candidates(store: &CredentialStore, cache: &CompletionCache) -> Vec<String> {
    cached_fetch(store, cache, "plans", PLANS_TTL, |client| client.list_plans(None))
        .map(|plans: Vec<Plan>| {
            plans
                .iter()
                .map(|plan| format!("{}\t{}", plan.name, plan.backend))
                .collect()
        })
        .unwrap_or_default()
}

pub fn region_candidates(store: &CredentialStore, cache: &CompletionCache) -> Vec<String> {
    cached_fetch(store, cache, "regions", REGIONS_TTL, |client| client.list_regions(None))
        .map(|regions: Vec<Region>| {
            regions
                .iter()
                .map(|region| format!("{}::{}\t{}", region.provider, region.region, region.name))
                .collect()
        })
        .unwrap_or_default()
}

pub fn vpc_candidates(store: &CredentialStore, cache: &CompletionCache) -> Vec<String> {
    cached_fetch(store, cache, "vpcs", VPCS_TTL, Client::list_vpcs)
        .map(|vpcs: Vec<Vpc>| {
            vpcs.iter()
                .map(|vpc| format!("{}\t{} ({})", vpc.id, vpc.name, vpc.region))
                .collect()
        })
        .unwrap_or_default()
}

/// Cache-first fetch of one resource class. The cache holds the full
/// last-known list; on a miss the live result repopulates it wholesale.
fn cached_fetch<T, F>(
    store: &CredentialStore,
    cache: &CompletionCache,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> Option<T>
where
    T: serde::de::DeserializeOwned + Serialize,
    F: Fn(&Client) -> Result<T, crate::client::ApiError>,
{
    // Never prompt from a completion callback.
    let api_key = store.stored_main_key()?;

    if let Some(value) = cache.get(key, ttl) {
        if let Ok(parsed) = serde_json::from_value::<T>(value) {
            return Some(parsed);
        }
    }

    let client = Client::new(api_key);
    let fetched = fetch(&client).ok()?;
    if let Err(err) = cache.set(key, ttl, &fetched) {
        debug!("completion cache write failed for {key}: {err:#}");
    }
    Some(fetched)
}
