use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use crewlink_voice::audio::params::compute_audio_parameters;
use crewlink_voice::game::{GameState, LobbySettings, Phase, Player, UserSettings};
use crewlink_voice::geometry::{any_obstruction_between, Point};

fn ten_player_state(phase: Phase, map: u8) -> GameState {
    let players = (0..10)
        .map(|id| {
            let mut p = Player::new(id, format!("player{}", id)).at(-20.0 + id as f32 * 4.0, (id % 3) as f32 * 2.5);
            p.is_dead = id == 7;
            p.is_impostor = id < 2;
            p.in_vent = id == 1;
            p
        })
        .collect();
    GameState {
        phase,
        map,
        lobby_code: "ABCDEF".to_string(),
        players,
        ..GameState::default()
    }
}

/// One recompute tick: the local player against every other player
fn bench_tick(c: &mut Criterion) {
    let user = UserSettings::default();
    let lobby = LobbySettings {
        haunting: true,
        ..LobbySettings::default()
    };

    let mut group = c.benchmark_group("recompute_tick");
    for (name, phase, map) in [
        ("lobby", Phase::Lobby, 0),
        ("tasks_skeld", Phase::Tasks, 0),
        ("tasks_polus", Phase::Tasks, 2),
        ("discussion", Phase::Discussion, 1),
    ] {
        let state = ten_player_state(phase, map);
        let me = state.players[0].clone();
        group.bench_function(name, |b| {
            b.iter(|| {
                for other in &state.players[1..] {
                    black_box(compute_audio_parameters(black_box(&state), &user, &lobby, &me, other));
                }
            })
        });
    }
    group.finish();
}

fn bench_obstruction(c: &mut Criterion) {
    let a = Point { x: -18.0, y: -4.0 };
    let b = Point { x: 12.0, y: 3.0 };
    c.bench_function("obstruction_skeld_long_line", |bench| {
        bench.iter(|| any_obstruction_between(black_box(0), black_box(a), black_box(b)))
    });
}

criterion_group!(benches, bench_tick, bench_obstruction);
criterion_main!(benches);
