//! End-to-end behaviour of the controller over an in-memory store

use async_trait::async_trait;
use meshplane_common::{Error, Iface, IfacePeer, Result, Route, Router, Rule, RuleAction, RuleSpec, Subnets};
use meshplane_controller::firewalld::rule_body;
use meshplane_controller::{ControllerConfig, CreateRouter, DeploymentJob, JobHandle, JobRunner, StateManager};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

fn state() -> StateManager {
    StateManager::open_memory(ControllerConfig::default()).unwrap()
}

fn router(state: &StateManager, host: &str) -> Router {
    state
        .create_router(CreateRouter {
            host: host.to_string(),
            realize_wireguard_ifaces: true,
            realize_routes: true,
            realize_rules: true,
            ..Default::default()
        })
        .unwrap()
}

fn join(state: &StateManager, mesh: &str, router: &Router, subnets: &str) -> Result<()> {
    state
        .add_router_to_mesh_network(mesh, &router.meta.id, &Subnets::parse(subnets))
        .map(|_| ())
}

#[test]
fn two_router_mesh_has_symmetric_peers() {
    let state = state();
    state.create_mesh_network("corp", None).unwrap();
    let r1 = router(&state, "10.0.0.5");
    let r2 = router(&state, "203.0.113.9");

    join(&state, "corp", &r1, "10.1.0.0/24").unwrap();
    join(&state, "corp", &r2, "10.2.0.0/24").unwrap();

    let from_r1 = state.list_peers_by_router(&r1.meta.id).unwrap();
    let from_r2 = state.list_peers_by_router(&r2.meta.id).unwrap();
    assert_eq!(from_r1.len() + from_r2.len(), 2);

    assert_eq!(from_r1[0].spec.allowed_ips.to_string(), "10.2.0.0/24");
    assert_eq!(from_r2[0].spec.allowed_ips.to_string(), "10.1.0.0/24");

    // private side keeps the tunnel to the exit side warm, not the reverse
    assert_eq!(from_r1[0].spec.persistent_keepalive, 10);
    assert_eq!(from_r2[0].spec.persistent_keepalive, 0);
}

#[test]
fn overlapping_advertisement_rejected() {
    let state = state();
    state.create_mesh_network("corp", None).unwrap();
    let r1 = router(&state, "10.0.0.5");
    let r2 = router(&state, "10.0.0.6");

    join(&state, "corp", &r1, "10.0.0.0/24").unwrap();
    assert!(matches!(
        join(&state, "corp", &r2, "10.0.0.0/24"),
        Err(Error::Conflict(_))
    ));
    assert!(state.list_ifaces_by_router(&r2.meta.id).unwrap().is_empty());
    join(&state, "corp", &r2, "10.0.1.0/24").unwrap();
}

#[test]
fn double_join_conflicts() {
    let state = state();
    state.create_mesh_network("corp", None).unwrap();
    let r1 = router(&state, "10.0.0.5");
    join(&state, "corp", &r1, "10.1.0.0/24").unwrap();
    let err = join(&state, "corp", &r1, "10.7.0.0/24").unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(err.status_code(), 409);
}

#[test]
fn one_router_in_three_meshes_gets_distinct_ports() {
    let state = state();
    let r1 = router(&state, "10.0.0.5");
    for (i, mesh) in ["a", "b", "c"].iter().enumerate() {
        state.create_mesh_network(mesh, None).unwrap();
        join(&state, mesh, &r1, &format!("10.{}.0.0/24", i + 1)).unwrap();
    }

    let ifaces = state.list_ifaces_by_router(&r1.meta.id).unwrap();
    let ports: HashSet<u16> = ifaces.iter().map(Iface::listen_port).collect();
    let names: HashSet<&str> = ifaces.iter().map(|i| i.spec.ifname.as_str()).collect();
    assert_eq!(ports.len(), 3);
    assert_eq!(names, HashSet::from(["wg0", "wg1", "wg2"]));
    assert!(ports.contains(&20000));
}

#[test]
fn freed_port_and_name_are_reused() {
    let state = state();
    let r1 = router(&state, "10.0.0.5");
    state.create_mesh_network("a", None).unwrap();
    state.create_mesh_network("b", None).unwrap();
    join(&state, "a", &r1, "10.1.0.0/24").unwrap();
    join(&state, "b", &r1, "10.2.0.0/24").unwrap();

    state.remove_router_from_mesh_network("a", &r1.meta.id).unwrap();
    state.create_mesh_network("c", None).unwrap();
    join(&state, "c", &r1, "10.3.0.0/24").unwrap();

    let mn_c = state.get_mesh_network("c").unwrap();
    let iface = state
        .get_iface_by_router_mesh_network(&r1.meta.id, &mn_c.meta.id)
        .unwrap()
        .unwrap();
    assert_eq!(iface.spec.ifname, "wg0");
    assert_eq!(iface.listen_port(), 20000);
}

#[test]
fn rule_rendering_and_validation() {
    let mut mss = RuleSpec::new("r", RuleAction::Tcpmss);
    mss.proto = "tcp".into();
    assert!(rule_body(&mss).ends_with("-j TCPMSS --clamp-mss-to-pmtu"));

    let state = state();
    let r1 = router(&state, "10.0.0.5");
    let mut dnat = RuleSpec::new(&r1.meta.id, RuleAction::Dnat);
    dnat.out_ifname = "eth0".into();
    let err = state.create_rule(dnat).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(err.status_code(), 400);
}

#[test]
fn router_delete_cascades() {
    let state = state();
    state.create_mesh_network("corp", None).unwrap();
    let r1 = router(&state, "10.0.0.5");
    let r2 = router(&state, "203.0.113.9");
    join(&state, "corp", &r1, "10.1.0.0/24").unwrap();
    join(&state, "corp", &r2, "10.2.0.0/24").unwrap();
    state.add_iface(&r1, "eth1").unwrap();
    state.create_route(&r1, "eth1", "192.168.0.0/24", "").unwrap();
    state.create_route(&r1, "wg0", "10.2.0.0/24", "").unwrap();

    state.delete_router(&r1.meta.id).unwrap();

    let db = state.db();
    assert!(db.get_resource::<Router>(&r1.meta.id).unwrap().is_none());
    assert!(db
        .list_resources_by::<Iface>("router_id", &r1.meta.id)
        .unwrap()
        .is_empty());
    assert!(db
        .list_resources_by::<Route>("router_id", &r1.meta.id)
        .unwrap()
        .is_empty());
    assert!(db
        .list_resources_by::<Rule>("router_id", &r1.meta.id)
        .unwrap()
        .is_empty());
    // no dangling peer on the surviving router
    assert!(db.list_resources::<IfacePeer>().unwrap().is_empty());
    assert_eq!(state.list_members(&state.get_mesh_network("corp").unwrap().meta.id).unwrap().len(), 1);
}

#[test]
fn host_change_rewrites_remote_endpoints() {
    let state = state();
    state.create_mesh_network("corp", None).unwrap();
    let r1 = router(&state, "10.0.0.5");
    let r2 = router(&state, "203.0.113.9");
    join(&state, "corp", &r1, "10.1.0.0/24").unwrap();
    join(&state, "corp", &r2, "10.2.0.0/24").unwrap();

    state
        .update_router(
            &r2.meta.id,
            meshplane_controller::UpdateRouter {
                host: Some("198.51.100.20".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let peer = &state.list_peers_by_router(&r1.meta.id).unwrap()[0];
    assert!(peer.spec.endpoint.starts_with("198.51.100.20:"));
}

#[derive(Default)]
struct RecordingRunner {
    jobs: Mutex<Vec<DeploymentJob>>,
}

#[async_trait]
impl JobRunner for RecordingRunner {
    async fn submit(&self, job: DeploymentJob) -> Result<JobHandle> {
        let handle = JobHandle {
            id: uuid::Uuid::new_v4().to_string(),
            name: job.name.clone(),
            manifest_hash: job.manifest_hash(),
            submitted_at: chrono::Utc::now().timestamp(),
        };
        self.jobs.lock().push(job);
        Ok(handle)
    }
}

struct FailingRunner;

#[async_trait]
impl JobRunner for FailingRunner {
    async fn submit(&self, job: DeploymentJob) -> Result<JobHandle> {
        Err(Error::JobSubmission(format!("{} rejected", job.name)))
    }
}

#[tokio::test]
async fn realize_submits_one_job_per_member() {
    let state = state();
    state.create_mesh_network("corp", None).unwrap();
    let r1 = router(&state, "10.0.0.5");
    let r2 = router(&state, "203.0.113.9");
    join(&state, "corp", &r1, "10.1.0.0/24").unwrap();
    join(&state, "corp", &r2, "10.2.0.0/24").unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let handles = state
        .realize_mesh_network("corp", runner.as_ref())
        .await
        .unwrap();
    assert_eq!(handles.len(), 2);

    let jobs = runner.jobs.lock();
    for job in jobs.iter() {
        assert!(job.files.contains_key("wireguard/wg0.conf"));
        assert!(job.files.contains_key("firewalld/direct.xml"));
    }
}

#[tokio::test]
async fn realize_failures_are_aggregated() {
    let state = state();
    state.create_mesh_network("corp", None).unwrap();
    let r1 = router(&state, "10.0.0.5");
    let r2 = router(&state, "203.0.113.9");
    join(&state, "corp", &r1, "10.1.0.0/24").unwrap();
    join(&state, "corp", &r2, "10.2.0.0/24").unwrap();

    match state.realize_mesh_network("corp", &FailingRunner).await {
        Err(Error::Aggregate { errors, .. }) => assert_eq!(errors.len(), 2),
        other => panic!("expected aggregate error, got {:?}", other),
    }
    let r1 = state.get_router(&r1.meta.id).unwrap();
    assert!(r1.status.last_job_id.is_none());
}

#[test]
fn concurrent_joins_get_unique_ports() {
    let state = state();
    let r1 = router(&state, "10.0.0.5");
    let meshes: Vec<String> = (0..8).map(|i| format!("m{}", i)).collect();
    for m in &meshes {
        state.create_mesh_network(m, None).unwrap();
    }

    std::thread::scope(|s| {
        for (i, m) in meshes.iter().enumerate() {
            let state = state.clone();
            let id = r1.meta.id.clone();
            s.spawn(move || {
                state
                    .add_router_to_mesh_network(m, &id, &Subnets::parse(&format!("10.{}.0.0/24", i)))
                    .unwrap();
            });
        }
    });

    let ifaces = state.list_ifaces_by_router(&r1.meta.id).unwrap();
    let ports: HashSet<u16> = ifaces.iter().map(Iface::listen_port).collect();
    let names: HashSet<&str> = ifaces.iter().map(|i| i.spec.ifname.as_str()).collect();
    assert_eq!(ifaces.len(), 8);
    assert_eq!(ports.len(), 8);
    assert_eq!(names.len(), 8);
}
