//! Audio parameter calculator
//!
//! Maps (game state, settings, listener, speaker) to the parameters of the
//! speaker's audio graph. The function is pure and deterministic so that
//! every peer can be recomputed independently on each snapshot tick.
//!
//! Rules run in a fixed order and later rules win on `gain`:
//! phase base gain, task-phase mutes, haunting, vent muffling, stereo
//! clamping, wall obstruction, distance cutoff, spatial-audio toggle.

use serde::Serialize;

use crate::game::{GameState, LobbySettings, Phase, Player, UserSettings};
use crate::geometry::{any_obstruction_between, distance_squared, Point};

/// Gain of a haunting dead crewmate as heard by a living impostor
pub const HAUNTING_GAIN: f32 = 0.075;

/// Gain ceiling while either player is in a vent
pub const VENT_GAIN_CEILING: f32 = 0.7;

/// Low-pass cutoff while either player is in a vent (Hz)
pub const VENT_MUFFLE_CUTOFF_HZ: f32 = 1200.0;

/// Low-pass resonance while either player is in a vent
pub const VENT_MUFFLE_Q: f32 = 20.0;

/// Effectively-open filter cutoff (Hz)
pub const OPEN_MUFFLE_CUTOFF_HZ: f32 = 8000.0;

/// Stereo offset bound on each axis
pub const STEREO_LIMIT: f32 = 999.0;

/// Fixed listener-relative depth of every source
pub const DEPTH_OFFSET: f32 = -0.5;

/// Low-pass filter settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Muffle {
    pub cutoff_hz: f32,
    pub q: f32,
}

impl Muffle {
    pub const OPEN: Muffle = Muffle {
        cutoff_hz: OPEN_MUFFLE_CUTOFF_HZ,
        q: 0.0,
    };

    pub const VENT: Muffle = Muffle {
        cutoff_hz: VENT_MUFFLE_CUTOFF_HZ,
        q: VENT_MUFFLE_Q,
    };
}

/// Everything applied to one peer's audio graph in a single step
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioParameters {
    /// Output gain, 0..=1
    pub gain: f32,
    /// Speaker position relative to the listener, each axis in ±999
    pub offset_x: f32,
    pub offset_y: f32,
    /// Listener-relative depth
    pub depth: f32,
    pub muffle: Muffle,
    /// Reverb send level, 0..=1
    pub reverb_send: f32,
    /// Panner distance model range
    pub max_distance: f32,
}

impl AudioParameters {
    /// Parameters of a freshly created graph: silent until the first tick
    pub fn silent(max_distance: f32) -> Self {
        Self {
            gain: 0.0,
            offset_x: 0.0,
            offset_y: 0.0,
            depth: DEPTH_OFFSET,
            muffle: Muffle::OPEN,
            reverb_send: 0.0,
            max_distance,
        }
    }
}

fn clamp_axis(value: f32) -> f32 {
    let value = if value.is_finite() { value } else { STEREO_LIMIT };
    value.clamp(-STEREO_LIMIT, STEREO_LIMIT)
}

/// Compute the audio parameters for hearing `other` as `me`
pub fn compute_audio_parameters(
    state: &GameState,
    settings: &UserSettings,
    lobby: &LobbySettings,
    me: &Player,
    other: &Player,
) -> AudioParameters {
    let mut offset = (other.x - me.x, other.y - me.y);
    let mut reverb_send = 0.0;

    let mut gain = match state.phase {
        Phase::Menu | Phase::Unknown => 0.0,
        Phase::Lobby => 1.0,
        Phase::Tasks => {
            let mut gain = 1.0;

            // Comms sabotage silences everyone for living crewmates
            if me.is_alive() && lobby.comms_sabotage && state.comms_sabotaged && !me.is_impostor {
                gain = 0.0;
            }

            if other.in_vent && !lobby.hear_impostors_in_vents {
                gain = 0.0;
            }

            if me.is_alive() && other.is_dead {
                gain = 0.0;
            }

            // Haunting overrides the dead-mute above
            if me.is_alive() && me.is_impostor && other.is_dead && !other.is_impostor && lobby.haunting {
                gain = HAUNTING_GAIN;
                reverb_send = 1.0;
            }

            gain
        }
        Phase::Discussion => {
            offset = (0.0, 0.0);
            if me.is_alive() && other.is_dead {
                0.0
            } else {
                1.0
            }
        }
    };

    let muffle = if me.in_vent || other.in_vent {
        gain = gain.min(VENT_GAIN_CEILING);
        Muffle::VENT
    } else {
        Muffle::OPEN
    };

    let mut offset_x = clamp_axis(offset.0);
    let mut offset_y = clamp_axis(offset.1);

    if any_obstruction_between(state.map, Point::new(me.x, me.y), Point::new(other.x, other.y)) {
        gain = 0.0;
    }

    let max_distance = lobby.max_distance;
    if distance_squared(Point::new(0.0, 0.0), Point::new(offset_x, offset_y)) > max_distance * max_distance {
        gain = 0.0;
    }

    if !settings.enable_spatial_audio {
        offset_x = 0.0;
        offset_y = 0.0;
    }

    AudioParameters {
        gain,
        offset_x,
        offset_y,
        depth: DEPTH_OFFSET,
        muffle,
        reverb_send,
        max_distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(phase: Phase) -> GameState {
        GameState {
            phase,
            lobby_code: "ABCDEF".to_string(),
            ..GameState::default()
        }
    }

    fn compute(state: &GameState, lobby: &LobbySettings, me: &Player, other: &Player) -> AudioParameters {
        compute_audio_parameters(state, &UserSettings::default(), lobby, me, other)
    }

    #[test]
    fn test_phase_base_gain() {
        let me = Player::new(1, "me");
        let other = Player::new(2, "other").at(1.0, 0.0);
        let lobby = LobbySettings::default();

        assert_eq!(compute(&state(Phase::Menu), &lobby, &me, &other).gain, 0.0);
        assert_eq!(compute(&state(Phase::Lobby), &lobby, &me, &other).gain, 1.0);
        assert_eq!(compute(&state(Phase::Tasks), &lobby, &me, &other).gain, 1.0);
        assert_eq!(compute(&state(Phase::Discussion), &lobby, &me, &other).gain, 1.0);
        assert_eq!(compute(&state(Phase::Unknown), &lobby, &me, &other).gain, 0.0);
    }

    #[test]
    fn test_discussion_centres_everyone() {
        let me = Player::new(1, "me");
        let other = Player::new(2, "other").at(300.0, -40.0);
        let params = compute(&state(Phase::Discussion), &LobbySettings::default(), &me, &other);

        assert_eq!((params.offset_x, params.offset_y), (0.0, 0.0));
        assert_eq!(params.gain, 1.0);
    }

    #[test]
    fn test_discussion_mutes_dead_for_living() {
        let me = Player::new(1, "me");
        let mut other = Player::new(2, "ghost");
        other.is_dead = true;

        let params = compute(&state(Phase::Discussion), &LobbySettings::default(), &me, &other);
        assert_eq!(params.gain, 0.0);

        let mut dead_me = me.clone();
        dead_me.is_dead = true;
        let params = compute(&state(Phase::Discussion), &LobbySettings::default(), &dead_me, &other);
        assert_eq!(params.gain, 1.0);
    }

    #[test]
    fn test_comms_sabotage() {
        let mut game = state(Phase::Tasks);
        game.comms_sabotaged = true;
        let me = Player::new(1, "crew");
        let other = Player::new(2, "other").at(1.0, 1.0);
        let lobby = LobbySettings::default();

        assert_eq!(compute(&game, &lobby, &me, &other).gain, 0.0);

        let mut impostor = me.clone();
        impostor.is_impostor = true;
        assert_eq!(compute(&game, &lobby, &impostor, &other).gain, 1.0);

        let lenient = LobbySettings {
            comms_sabotage: false,
            ..lobby
        };
        assert_eq!(compute(&game, &lenient, &me, &other).gain, 1.0);
    }

    #[test]
    fn test_vent_mute_and_muffle() {
        let game = state(Phase::Tasks);
        let me = Player::new(1, "me");
        let mut other = Player::new(2, "vented").at(1.0, 0.0);
        other.in_vent = true;

        let lobby = LobbySettings::default();
        let params = compute(&game, &lobby, &me, &other);
        assert_eq!(params.gain, 0.0);
        assert_eq!(params.muffle, Muffle::VENT);

        let hear = LobbySettings {
            hear_impostors_in_vents: true,
            ..lobby
        };
        let params = compute(&game, &hear, &me, &other);
        assert_eq!(params.gain, VENT_GAIN_CEILING);
        assert_eq!(params.muffle, Muffle::VENT);
    }

    #[test]
    fn test_listener_in_vent_caps_gain() {
        let mut me = Player::new(1, "me");
        me.in_vent = true;
        let other = Player::new(2, "other").at(0.5, 0.5);

        let params = compute(&state(Phase::Lobby), &LobbySettings::default(), &me, &other);
        assert_eq!(params.gain, VENT_GAIN_CEILING);
        assert_eq!(params.muffle.cutoff_hz, VENT_MUFFLE_CUTOFF_HZ);
    }

    #[test]
    fn test_haunting() {
        let game = state(Phase::Tasks);
        let mut impostor = Player::new(1, "impostor");
        impostor.is_impostor = true;
        let mut ghost = Player::new(2, "ghost").at(1.0, 0.0);
        ghost.is_dead = true;

        let haunting = LobbySettings {
            haunting: true,
            ..LobbySettings::default()
        };
        let params = compute(&game, &haunting, &impostor, &ghost);
        assert_eq!(params.gain, HAUNTING_GAIN);
        assert_eq!(params.reverb_send, 1.0);

        // Without haunting the dead stay silent
        let params = compute(&game, &LobbySettings::default(), &impostor, &ghost);
        assert_eq!(params.gain, 0.0);
        assert_eq!(params.reverb_send, 0.0);

        // Dead impostors don't haunt
        let mut dead_impostor = ghost.clone();
        dead_impostor.is_impostor = true;
        let params = compute(&game, &haunting, &impostor, &dead_impostor);
        assert_eq!(params.gain, 0.0);
    }

    #[test]
    fn test_mira_wall_scenario() {
        let mut game = state(Phase::Tasks);
        game.map = 1;
        let me = Player::new(1, "me").at(0.0, 0.0);
        let other = Player::new(2, "other").at(20.0, 0.0);
        let lobby = LobbySettings {
            max_distance: 100.0,
            ..LobbySettings::default()
        };

        assert_eq!(compute(&game, &lobby, &me, &other).gain, 0.0);

        // Same pair on The Skeld is audible
        game.map = 0;
        assert_eq!(compute(&game, &lobby, &me, &other).gain, 1.0);
    }

    #[test]
    fn test_distance_cutoff() {
        let game = state(Phase::Lobby);
        let me = Player::new(1, "me");
        let lobby = LobbySettings::default();

        let near = Player::new(2, "near").at(3.0, 4.0);
        assert_eq!(compute(&game, &lobby, &me, &near).gain, 1.0);

        let far = Player::new(3, "far").at(6.0, 0.0);
        assert_eq!(compute(&game, &lobby, &me, &far).gain, 0.0);
    }

    #[test]
    fn test_missing_position_is_far() {
        let me = Player::new(1, "me");
        let mut other = Player::new(2, "nowhere");
        other.x = f32::NAN;
        other.y = f32::NEG_INFINITY;

        let params = compute(&state(Phase::Lobby), &LobbySettings::default(), &me, &other);
        assert_eq!(params.offset_x, STEREO_LIMIT);
        assert_eq!(params.offset_y, STEREO_LIMIT);
        assert_eq!(params.gain, 0.0);
    }

    #[test]
    fn test_spatial_audio_disabled_keeps_gain() {
        let me = Player::new(1, "me");
        let other = Player::new(2, "other").at(2.0, 1.0);
        let settings = UserSettings {
            enable_spatial_audio: false,
        };

        let params = compute_audio_parameters(&state(Phase::Tasks), &settings, &LobbySettings::default(), &me, &other);
        assert_eq!((params.offset_x, params.offset_y), (0.0, 0.0));
        assert_eq!(params.gain, 1.0);
    }

    fn player_strategy(id: u32) -> impl Strategy<Value = Player> {
        (-60f32..60.0, -60f32..60.0, any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            move |(x, y, is_dead, is_impostor, in_vent)| {
                let mut player = Player::new(id, format!("p{id}")).at(x, y);
                player.is_dead = is_dead;
                player.is_impostor = is_impostor;
                player.in_vent = in_vent;
                player
            },
        )
    }

    fn lobby_strategy() -> impl Strategy<Value = LobbySettings> {
        (0.5f32..80.0, any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(max_distance, haunting, hear_impostors_in_vents, comms_sabotage)| LobbySettings {
                max_distance,
                haunting,
                hear_impostors_in_vents,
                comms_sabotage,
            },
        )
    }

    fn phase_strategy() -> impl Strategy<Value = Phase> {
        prop_oneof![
            Just(Phase::Lobby),
            Just(Phase::Tasks),
            Just(Phase::Discussion),
            Just(Phase::Menu),
            Just(Phase::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn prop_offsets_stay_bounded(
            phase in phase_strategy(),
            map in 0u8..4,
            lobby in lobby_strategy(),
            me in player_strategy(1),
            mut other in player_strategy(2),
            scale in prop_oneof![Just(1.0f32), Just(1.0e6), Just(f32::NAN), Just(f32::INFINITY)],
        ) {
            other.x *= scale;
            let game = GameState { phase, map, ..GameState::default() };
            let params = compute(&game, &lobby, &me, &other);
            prop_assert!(params.offset_x.abs() <= STEREO_LIMIT);
            prop_assert!(params.offset_y.abs() <= STEREO_LIMIT);
            prop_assert!((0.0f32..=1.0).contains(&params.gain));
        }

        #[test]
        fn prop_living_never_hears_dead_in_game(
            in_discussion in any::<bool>(),
            map in 0u8..4,
            lobby in lobby_strategy(),
            mut me in player_strategy(1),
            mut other in player_strategy(2),
        ) {
            me.is_dead = false;
            other.is_dead = true;
            let phase = if in_discussion { Phase::Discussion } else { Phase::Tasks };
            let game = GameState { phase, map, ..GameState::default() };
            let params = compute(&game, &lobby, &me, &other);

            let haunted = phase == Phase::Tasks && me.is_impostor && !other.is_impostor && lobby.haunting;
            if haunted {
                prop_assert!(params.gain == 0.0 || params.gain == HAUNTING_GAIN);
                prop_assert_eq!(params.reverb_send, 1.0);
            } else {
                prop_assert_eq!(params.gain, 0.0);
            }
        }

        #[test]
        fn prop_out_of_range_is_silent(
            phase in phase_strategy(),
            lobby in lobby_strategy(),
            me in player_strategy(1),
            other in player_strategy(2),
        ) {
            prop_assume!(phase != Phase::Discussion);
            let game = GameState { phase, map: 0, ..GameState::default() };
            let dx = other.x - me.x;
            let dy = other.y - me.y;
            prop_assume!(dx * dx + dy * dy > lobby.max_distance * lobby.max_distance);

            let first = compute(&game, &lobby, &me, &other);
            prop_assert_eq!(first.gain, 0.0);
            prop_assert_eq!(compute(&game, &lobby, &me, &other), first);
        }

        #[test]
        fn prop_base_gain_ignores_position_outside_game(
            phase in prop_oneof![Just(Phase::Lobby), Just(Phase::Menu), Just(Phase::Unknown)],
            x in -3f32..3.0,
            y in -3f32..3.0,
        ) {
            let game = GameState { phase, map: 0, ..GameState::default() };
            let me = Player::new(1, "me");
            let other = Player::new(2, "other").at(x, y);
            let lobby = LobbySettings { max_distance: 10.0, ..LobbySettings::default() };
            let expected = if phase == Phase::Lobby { 1.0 } else { 0.0 };
            prop_assert_eq!(compute(&game, &lobby, &me, &other).gain, expected);
        }
    }
}
