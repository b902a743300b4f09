use std::net::Ipv4Addr;

use pfcp::{
    rules::{ApplyAction, Far, Pdr},
    Entity, EntityOptions, Function, Ie, IeType, NodeId, RuleChanges,
};

fn pdi() -> Ie {
    // Source interface: access.
    Ie::new_grouped(IeType::PDI, &[Ie::new(IeType::SOURCE_INTERFACE, vec![0])])
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let node_id = NodeId::Ipv4(Ipv4Addr::LOCALHOST);
    let options = EntityOptions::default().with_port(0);

    // The user plane function answers, the control plane function drives.
    let up = Entity::with_options(node_id.clone(), Function::UserPlane, options.clone());
    let up_addr = up.start().await.unwrap();

    let cp = Entity::with_options(node_id.clone(), Function::ControlPlane, options);
    cp.start().await.unwrap();

    let association = cp.setup_association(node_id, up_addr).await.unwrap();
    tracing::info!(peer = %association.node_id(), "Associated");

    let session = association
        .new_initiated_session(
            cp.next_session_id(),
            vec![Pdr::new(1, 100, pdi()).with_far_id(1)],
            vec![Far::new(1, ApplyAction::FORW)],
        )
        .await
        .unwrap();
    tracing::info!(
        local_seid = session.local_seid().unwrap(),
        remote_seid = session.remote_seid().unwrap(),
        "Session established"
    );

    // Add a higher priority rule that buffers downlink traffic.
    let changes = RuleChanges::create(
        vec![Pdr::new(2, 10, pdi()).with_far_id(2)],
        vec![Far::new(2, ApplyAction::BUFF | ApplyAction::NOCP)],
    );
    let generation = session.modify(changes).await.unwrap();

    let order: Vec<_> = session.pdrs_by_precedence().iter().map(|pdr| pdr.id).collect();
    tracing::info!(generation, ?order, "Session modified");

    cp.shutdown();
    up.shutdown();
}
