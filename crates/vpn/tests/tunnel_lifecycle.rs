//! End-to-end tunnel lifecycle tests
//!
//! Drives the tunnel manager and both engines through complete scenarios:
//! negotiation, SA-pair derivation, packet round trips, anti-replay,
//! rekeying, cascaded deletion, and mid-negotiation cancellation.

use netlab_vpn::config::{Endpoint, SimConfig, TunnelParams};
use netlab_vpn::event::EventKind;
use netlab_vpn::ike::IkeSaState;
use netlab_vpn::packet::{PacketDescriptor, ProtectedPacket};
use netlab_vpn::selector::Direction;
use netlab_vpn::tunnel::{TunnelManager, TunnelState};
use netlab_vpn::Error;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Route engine logs through the test harness; safe to call repeatedly
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netlab_vpn=info".into()),
        )
        .with_test_writer()
        .try_init();
}

fn endpoint(id: &str, ip: [u8; 4], net: &str) -> Endpoint {
    Endpoint::new(id, id.to_uppercase(), Ipv4Addr::from(ip), net.parse().unwrap())
}

/// The lab scenario: two sites, preset "balanced", private networks
/// 192.168.1.0/24 and 192.168.10.0/24
fn lab_params(name: &str, psk: &[u8]) -> TunnelParams {
    TunnelParams::builder()
        .with_name(name)
        .with_local(endpoint("hq", [203, 0, 113, 1], "192.168.1.0/24"))
        .with_remote(endpoint("branch", [198, 51, 100, 7], "192.168.10.0/24"))
        .with_preset("balanced")
        .unwrap()
        .with_psk(psk)
        .build()
        .unwrap()
}

fn lab_manager() -> TunnelManager {
    init_tracing();
    TunnelManager::with_config(SimConfig::immediate())
}

fn lan_packet(size: usize) -> PacketDescriptor {
    PacketDescriptor::new(
        Ipv4Addr::new(192, 168, 1, 5),
        Ipv4Addr::new(192, 168, 10, 9),
        6,
        size,
    )
}

#[tokio::test]
async fn balanced_scenario_establishes_with_two_sas() {
    let manager = lab_manager();
    let before = manager.statistics().ike_negotiations_completed;

    let tunnel = manager
        .create_tunnel(lab_params("hq-to-branch", b"training-lab-psk"))
        .await
        .unwrap();

    assert_eq!(tunnel.state, TunnelState::Established);
    assert_eq!(tunnel.ipsec_spis.len(), 2);
    assert_eq!(
        manager.statistics().ike_negotiations_completed,
        before + 1
    );
}

#[tokio::test]
async fn established_ike_sa_implies_exactly_one_sa_pair() {
    let manager = lab_manager();
    let tunnel = manager
        .create_tunnel(lab_params("hq-to-branch", b"training-lab-psk"))
        .await
        .unwrap();

    let ike_sa_id = tunnel.ike_sa_id.unwrap();
    let ike_sa = manager.ike_engine().get(ike_sa_id).unwrap();
    assert_eq!(ike_sa.state, IkeSaState::Established);

    let spis = manager.ipsec_engine().spis_for_ike(ike_sa_id);
    assert_eq!(spis.len(), 2);

    let directions: HashSet<Direction> = spis
        .iter()
        .map(|spi| manager.ipsec_engine().get(*spi).unwrap().direction)
        .collect();
    assert!(directions.contains(&Direction::Inbound));
    assert!(directions.contains(&Direction::Outbound));
}

#[tokio::test]
async fn spis_stay_unique_across_create_delete_sequences() {
    let manager = lab_manager();
    let mut seen = HashSet::new();

    for round in 0..10 {
        let tunnel = manager
            .create_tunnel(lab_params(&format!("t{}", round), b"training-lab-psk"))
            .await
            .unwrap();

        // Active SPIs must be pairwise distinct
        let mut active = HashSet::new();
        for t in manager.list_tunnels() {
            for spi in &t.ipsec_spis {
                assert!(active.insert(*spi), "SPI 0x{:08x} reused while active", spi);
            }
        }

        seen.extend(tunnel.ipsec_spis.iter().copied());
        if round % 2 == 0 {
            manager.delete_tunnel(tunnel.id).unwrap();
        }
    }

    assert_eq!(seen.len(), 20, "every pair minted fresh SPIs");
}

#[tokio::test]
async fn packet_round_trip_preserves_descriptor() {
    let manager = lab_manager();
    let tunnel = manager
        .create_tunnel(lab_params("hq-to-branch", b"training-lab-psk"))
        .await
        .unwrap();

    let original = lan_packet(1400).with_ports(40000, 443);
    let protected = manager.encrypt_packet(&original).unwrap();
    assert!(protected.wire_len > original.size);

    // The peer receives the packet on the paired inbound SA
    let inbound_spi = tunnel
        .ipsec_spis
        .iter()
        .copied()
        .find(|spi| *spi != protected.spi)
        .unwrap();
    let arrived = ProtectedPacket {
        spi: inbound_spi,
        ..protected
    };

    let recovered = manager.decrypt_packet(&arrived).unwrap();
    assert_eq!(recovered, original);

    let stats = manager.statistics();
    assert_eq!(stats.packets_encrypted, 1);
    assert_eq!(stats.packets_decrypted, 1);
    assert_eq!(stats.bytes_encrypted, 1400);
    assert_eq!(stats.bytes_decrypted, 1400);
}

#[tokio::test]
async fn anti_replay_rejects_stale_and_duplicate_sequences() {
    let manager = lab_manager();
    let tunnel = manager
        .create_tunnel(lab_params("hq-to-branch", b"training-lab-psk"))
        .await
        .unwrap();

    let ipsec = manager.ipsec_engine();
    let inbound_spi = tunnel
        .ipsec_spis
        .iter()
        .copied()
        .find(|spi| ipsec.get(*spi).unwrap().direction == Direction::Inbound)
        .unwrap();

    let proposal = tunnel.ipsec_proposal.clone();
    let packet =
        |seq: u64| ProtectedPacket::encapsulate(inbound_spi, seq, &proposal, lan_packet(64));

    // Binding sequence: [5, 3, 5, 6]
    assert!(ipsec.decapsulate(&packet(5)).is_ok());
    assert!(matches!(
        ipsec.decapsulate(&packet(3)),
        Err(Error::ReplayDetected(3))
    ));
    assert!(matches!(
        ipsec.decapsulate(&packet(5)),
        Err(Error::ReplayDetected(5))
    ));
    assert!(ipsec.decapsulate(&packet(6)).is_ok());

    let stats = manager.statistics();
    assert_eq!(stats.replay_attacks_blocked, 2);

    let events = manager.events();
    assert_eq!(events.history_of(EventKind::ReplayBlocked).len(), 2);
}

#[tokio::test]
async fn deleting_ike_sa_removes_all_its_ipsec_sas() {
    let manager = lab_manager();
    let tunnel = manager
        .create_tunnel(lab_params("hq-to-branch", b"training-lab-psk"))
        .await
        .unwrap();
    let ike_sa_id = tunnel.ike_sa_id.unwrap();

    assert!(manager.ike_engine().delete(ike_sa_id));
    assert_eq!(manager.ipsec_engine().delete_sas_for_ike(ike_sa_id), 2);
    assert!(manager.ipsec_engine().spis_for_ike(ike_sa_id).is_empty());
    assert_eq!(manager.statistics().active_ipsec_sas, 0);
}

#[tokio::test]
async fn invalid_psk_yields_error_tunnel_and_no_residual_sas() {
    let manager = lab_manager();

    let err = manager
        .create_tunnel(lab_params("hq-to-branch", b"weak"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(_)));

    let tunnels = manager.list_tunnels();
    assert_eq!(tunnels.len(), 1);
    assert_eq!(tunnels[0].state, TunnelState::Error);

    let stats = manager.statistics();
    assert_eq!(stats.active_ike_sas, 0);
    assert_eq!(stats.active_ipsec_sas, 0);
    assert_eq!(stats.auth_failures, 1);
    assert_eq!(stats.ike_negotiations_failed, 1);

    let events = manager.events();
    assert_eq!(events.history_of(EventKind::NegotiationFailed).len(), 1);
}

#[tokio::test]
async fn find_matching_sa_scenario() {
    let manager = lab_manager();
    manager
        .create_tunnel(lab_params("hq-to-branch", b"training-lab-psk"))
        .await
        .unwrap();
    let ipsec = manager.ipsec_engine();

    // On-selector traffic matches the outbound SA
    let found = ipsec.find_matching_sa(
        Ipv4Addr::new(192, 168, 1, 5),
        Ipv4Addr::new(192, 168, 10, 9),
        6,
        None,
        None,
        Direction::Outbound,
    );
    assert!(found.is_some());
    assert_eq!(found.unwrap().direction, Direction::Outbound);

    // Off-selector traffic matches nothing
    let none = ipsec.find_matching_sa(
        Ipv4Addr::new(10, 0, 0, 5),
        Ipv4Addr::new(10, 0, 0, 9),
        6,
        None,
        None,
        Direction::Outbound,
    );
    assert!(none.is_none());
}

#[tokio::test]
async fn negotiation_events_arrive_in_phase_order() {
    let manager = lab_manager();
    let mut rx = manager.events().subscribe();

    manager
        .create_tunnel(lab_params("hq-to-branch", b"training-lab-psk"))
        .await
        .unwrap();

    let mut labels = Vec::new();
    while let Ok(event) = rx.try_recv() {
        labels.push(event.kind.label());
    }

    let phase_labels: Vec<&str> = labels
        .iter()
        .map(String::as_str)
        .filter(|l| l.starts_with("negotiation:") || l.starts_with("sa:"))
        .collect();
    assert_eq!(
        phase_labels,
        vec![
            "negotiation:sa_init:sent",
            "negotiation:sa_init:received",
            "negotiation:auth:sent",
            "negotiation:auth:received",
            "sa:established",
        ]
    );
}

#[tokio::test]
async fn deleting_tunnel_mid_negotiation_leaves_nothing_behind() {
    let manager = std::sync::Arc::new(TunnelManager::with_config(SimConfig {
        phase_delay: Duration::from_millis(40),
        ..SimConfig::default()
    }));

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .create_tunnel(lab_params("doomed", b"training-lab-psk"))
                .await
        })
    };

    // Let the negotiation get past tunnel insertion, then pull the tunnel
    // out from under it
    tokio::time::sleep(Duration::from_millis(15)).await;
    let id = manager.list_tunnels()[0].id;
    manager.delete_tunnel(id).unwrap();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled(_))));

    // The late negotiation must not have resurrected anything
    assert!(manager.get_tunnel(id).is_none());
    let stats = manager.statistics();
    assert_eq!(stats.active_ike_sas, 0);
    assert_eq!(stats.active_ipsec_sas, 0);
    assert_eq!(stats.active_tunnels, 0);
}

#[tokio::test]
async fn rekey_preserves_pair_and_cascade() {
    let manager = lab_manager();
    let tunnel = manager
        .create_tunnel(lab_params("hq-to-branch", b"training-lab-psk"))
        .await
        .unwrap();
    let old_sa = tunnel.ike_sa_id.unwrap();

    let rekeyed = manager.rekey_tunnel(tunnel.id).await.unwrap();
    let new_sa = rekeyed.ike_sa_id.unwrap();
    assert_ne!(new_sa, old_sa);
    assert_eq!(rekeyed.ipsec_spis, tunnel.ipsec_spis);

    // The cascade follows the new IKE SA after re-parenting
    manager.delete_tunnel(tunnel.id).unwrap();
    let stats = manager.statistics();
    assert_eq!(stats.active_ike_sas, 0);
    assert_eq!(stats.active_ipsec_sas, 0);
    assert_eq!(stats.rekey_operations, 1);
}

#[tokio::test]
async fn statistics_snapshot_reflects_full_session() {
    let manager = lab_manager();

    let tunnel = manager
        .create_tunnel(lab_params("one", b"training-lab-psk"))
        .await
        .unwrap();
    let _ = manager.create_tunnel(lab_params("two", b"weak")).await;

    let packet = lan_packet(300);
    manager.encrypt_packet(&packet).unwrap();

    let stats = manager.statistics();
    assert_eq!(stats.total_tunnels, 2);
    assert_eq!(stats.active_tunnels, 1);
    assert_eq!(stats.ike_negotiations_started, 2);
    assert_eq!(stats.ike_negotiations_completed, 1);
    assert_eq!(stats.ike_negotiations_failed, 1);
    assert_eq!(stats.packets_encrypted, 1);
    assert_eq!(stats.bytes_encrypted, 300);

    manager.delete_tunnel(tunnel.id).unwrap();
    let stats = manager.statistics();
    assert_eq!(stats.active_tunnels, 0);
    // Totals are monotone; deletion only moves gauges
    assert_eq!(stats.total_tunnels, 2);
}
