//! Drives a room end to end through the public library API

use arena_server::config::SimConfig;
use arena_server::game::combat::WeaponKind;
use arena_server::game::map::{MapData, SpawnPoint, Tile};
use arena_server::game::math::Vec2;
use arena_server::game::round::RoundPhase;
use arena_server::game::room::TickOutput;
use arena_server::game::{Outbound, PlayerId, Room, Stance, Target, Team};
use arena_server::netcode::{ClientPredictor, Correction};
use arena_server::store::Record;
use arena_server::ws::protocol::{ClientMsg, MovePayload, ServerMsg, ShootPayload, StateSnapshot};
use uuid::Uuid;

fn open_map() -> MapData {
    MapData {
        name: "open".into(),
        tile_size: 32.0,
        tiles: vec![vec![Tile::floor("floor"); 30]; 20],
        spawn_points: vec![
            SpawnPoint { id: "ct".into(), position: Vec2::new(100.0, 100.0), team: Team::Ct, angle: 0.0 },
            SpawnPoint { id: "t".into(), position: Vec2::new(500.0, 100.0), team: Team::T, angle: 0.0 },
        ],
        bomb_sites: Vec::new(),
        objects: Vec::new(),
    }
}

fn move_msg(sequence: u64, dx: f32) -> ClientMsg {
    ClientMsg::Move {
        sequence,
        timestamp: 1_000 + sequence * 16,
        payload: MovePayload { delta: Vec2::new(dx, 0.0), stance: Stance::Running, aim: 0.0 },
    }
}

fn snapshot(out: &TickOutput) -> Option<&StateSnapshot> {
    out.outbound.iter().find_map(|o| match &o.msg {
        ServerMsg::State(s) => Some(s),
        _ => None,
    })
}

fn join(room: &mut Room, name: &str, team: Team, weapon: WeaponKind) -> (PlayerId, Uuid) {
    let player = Uuid::new_v4();
    let conn = Uuid::new_v4();
    room.add_participant(player, name.into(), Some(team), Some(weapon)).unwrap();
    room.connect(player, conn).unwrap();
    (player, conn)
}

#[test]
fn single_round_match_ends_by_elimination() {
    let mut config = SimConfig::default();
    config.rules.max_rounds = 1;
    config.rules.freeze_secs = 0.1;
    config.rules.round_end_delay_secs = 0.1;

    let mut room = Room::new(Uuid::new_v4(), 3, &config, open_map()).unwrap();
    let (ct, ct_conn) = join(&mut room, "ct", Team::Ct, WeaponKind::Awp);
    let (t, _) = join(&mut room, "t", Team::T, WeaponKind::Glock);
    room.start().unwrap();

    for _ in 0..64 {
        if room.state().phase() == RoundPhase::RoundActive {
            break;
        }
        room.tick();
    }
    assert_eq!(room.state().phase(), RoundPhase::RoundActive);

    room.ingest(ct, ct_conn, ClientMsg::Shoot {
        sequence: 1,
        timestamp: 5_000,
        payload: ShootPayload { aim: 0.0 },
    });

    let mut finished = None;
    for _ in 0..200 {
        let out = room.tick();
        if let Some(summary) = out.match_over.clone() {
            assert!(out.outbound.iter().any(|o| matches!(o.msg, ServerMsg::MatchEnd { .. })));
            assert!(out.records.iter().any(|r| matches!(r, Record::MatchSummary(_))));
            assert_eq!(out.teardown.as_deref(), Some("match over"));
            finished = Some(summary);
            break;
        }
    }

    let summary = finished.expect("match reached game over");
    assert_eq!(summary.winner, Some(Team::Ct));
    assert_eq!(summary.score.ct, 1);
    let shooter = summary.players.iter().find(|p| p.player_id == ct).unwrap();
    let victim = summary.players.iter().find(|p| p.player_id == t).unwrap();
    assert_eq!(shooter.kills, 1);
    assert_eq!(victim.deaths, 1);
    assert!(room.is_closed());
}

#[test]
fn reconnect_within_grace_resumes_the_sequence() {
    let mut room = Room::new(Uuid::new_v4(), 4, &SimConfig::default(), open_map()).unwrap();
    let (player, conn) = join(&mut room, "p", Team::Ct, WeaponKind::Usp);

    room.ingest(player, conn, move_msg(1, 2.0));
    room.tick();
    room.ingest(player, conn, move_msg(2, 2.0));
    room.tick();
    room.disconnect(player, conn);
    for _ in 0..10 {
        room.tick();
    }
    assert!(!room.state().player(player).unwrap().is_connected());

    let fresh = Uuid::new_v4();
    let welcome = room.connect(player, fresh).unwrap();
    assert!(welcome.iter().any(|o| o.target == Target::Connection(fresh)
        && matches!(o.msg, ServerMsg::Welcome { ack_sequence: 2, .. })));

    room.ingest(player, fresh, move_msg(3, 2.0));
    let out = room.tick();
    let me = snapshot(&out)
        .and_then(|s| s.players.iter().find(|p| p.id == player))
        .unwrap();
    assert_eq!(me.ack_sequence, 3);
    assert!(me.connected);
    assert_eq!(me.position, Vec2::new(106.0, 100.0));
}

#[test]
fn abandoned_slot_is_reclaimed_and_the_room_closes() {
    let mut config = SimConfig::default();
    config.reconnect_grace_secs = 0.1;

    let mut room = Room::new(Uuid::new_v4(), 5, &config, open_map()).unwrap();
    let (player, conn) = join(&mut room, "p", Team::T, WeaponKind::Glock);
    room.disconnect(player, conn);

    let mut left = Vec::new();
    let mut teardown = None;
    for _ in 0..64 {
        let out = room.tick();
        left.extend(out.left);
        if out.teardown.is_some() {
            teardown = out.teardown;
            break;
        }
    }

    assert_eq!(left, vec![player]);
    assert_eq!(teardown.as_deref(), Some("all players left"));
    assert!(room.connect(player, Uuid::new_v4()).is_err());
}

#[test]
fn client_prediction_agrees_with_the_authoritative_snapshot() {
    let mut room = Room::new(Uuid::new_v4(), 6, &SimConfig::default(), open_map()).unwrap();
    let (player, conn) = join(&mut room, "p", Team::Ct, WeaponKind::Usp);
    let mut predictor = ClientPredictor::new(Vec2::new(100.0, 100.0), SimConfig::default().correction_threshold);

    predictor.apply_local(1, Vec2::new(3.0, 0.0));
    room.ingest(player, conn, move_msg(1, 3.0));
    predictor.apply_local(2, Vec2::new(3.0, 0.0));

    let out = room.tick();
    let me = snapshot(&out)
        .and_then(|s| s.players.iter().find(|p| p.id == player))
        .unwrap();
    assert_eq!(me.ack_sequence, 1);

    assert_eq!(predictor.reconcile(me.ack_sequence, me.position), Correction::None);
    assert_eq!(predictor.unacknowledged(), 1);
    assert_eq!(predictor.position(), Vec2::new(106.0, 100.0));
}

#[test]
fn out_of_order_input_is_dropped_or_resynced() {
    let mut room = Room::new(Uuid::new_v4(), 7, &SimConfig::default(), open_map()).unwrap();
    let (player, conn) = join(&mut room, "p", Team::Ct, WeaponKind::Usp);

    room.ingest(player, conn, move_msg(1, 1.0));
    room.tick();

    // replay of an already applied command
    room.ingest(player, conn, move_msg(1, 1.0));
    let out = room.tick();
    let me = snapshot(&out)
        .and_then(|s| s.players.iter().find(|p| p.id == player))
        .unwrap();
    assert_eq!(me.position, Vec2::new(101.0, 100.0));
    assert!(!out.outbound.iter().any(|o| matches!(o.msg, ServerMsg::Resync { .. })));

    room.ingest(player, conn, move_msg(4, 1.0));
    let out = room.tick();
    assert!(out.outbound.iter().any(|o: &Outbound| o.target == Target::Player(player)
        && o.msg == ServerMsg::Resync { expected_sequence: 2 }));
}
