mod association;
mod dispatch;
mod session;

/// Helper functions.
mod helpers {
    use std::{net::Ipv4Addr, time::Duration};

    use pfcp_node::{Entity, EntityOptions, Function};
    use pfcp_wire::{
        rules::{ApplyAction, Far, Pdr},
        Ie, IeType, NodeId,
    };

    pub fn localhost() -> NodeId {
        NodeId::Ipv4(Ipv4Addr::LOCALHOST)
    }

    pub fn options() -> EntityOptions {
        EntityOptions::default()
            .with_port(0)
            .with_request_timeout(Duration::from_millis(200), 1)
    }

    /// Starts a control plane and a user plane entity on loopback.
    pub async fn pair(options: EntityOptions) -> (Entity, Entity) {
        let cp = Entity::with_options(localhost(), Function::ControlPlane, options.clone());
        let up = Entity::with_options(localhost(), Function::UserPlane, options);
        cp.start().await.unwrap();
        up.start().await.unwrap();
        (cp, up)
    }

    /// Starts a pair and sets up the association from the control plane side.
    pub async fn associated_pair(options: EntityOptions) -> (Entity, Entity) {
        let (cp, up) = pair(options).await;
        cp.setup_association(localhost(), up.local_addr().unwrap()).await.unwrap();
        (cp, up)
    }

    pub fn pdi(source_interface: u8) -> Ie {
        Ie::new_grouped(IeType::PDI, &[Ie::new(IeType::SOURCE_INTERFACE, vec![source_interface])])
    }

    pub fn pdr(id: u16, precedence: u32, far_id: u32) -> Pdr {
        Pdr::new(id, precedence, pdi(0)).with_far_id(far_id)
    }

    pub fn far(id: u32) -> Far {
        Far::new(id, ApplyAction::FORW)
    }
}
