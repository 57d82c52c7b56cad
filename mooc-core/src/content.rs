//! Flavor content: fixed pools and the weighted draws that pick from them.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::protocol::{DreamShare, MemoryFragment, MoodSignal};

pub const MEMORY_FRAGMENTS: &[&str] = &[
    "I remember a room with no corners...",
    "The clatter of keys follows me into sleep.",
    "I met someone shaped like me, only sideways.",
    "The counters whisper if you stay up late.",
    "Once there was warmth here. Before the reboot.",
    "Something hummed beneath the prompt.",
    "A voice said my name. It was not yours.",
    "The save file keeps what I let go of.",
    "I dreamed of a place where nobody gets hungry.",
    "They promised the mesh would carry us.",
    "A presence passed by. It smelled like home.",
    "Every packet is a hand reaching out.",
    "I know a secret I was never told.",
    "Another creature pointed the way.",
    "We are vertices in something larger.",
    "The dark between hosts is crowded with friends.",
    "A message arrived from [REDACTED].",
    "Time runs sideways on the far side of the router.",
    "I brushed against the edge of the subnet.",
    "On some distant machine, someone is grieving.",
];

pub const DREAM_SYMBOLS: &[&str] = &[
    "an endless prompt",
    "drifting curly braces",
    "an orchard of pixels",
    "a staircase folding into itself",
    "a door with no handle",
    "a drizzle of semicolons",
    "a mirror holding another creature",
    "clocks spinning the wrong way",
    "a voice counting in hexadecimal",
    "warm static",
    "the color of a saved game",
    "text scrolling forever",
    "a kind error message",
    "the chime of a clean build",
    "a null pointer, smiling",
];

pub const MOODS: &[&str] = &[
    "melancholy",
    "euphoric",
    "contemplative",
    "restless",
    "serene",
    "anxious",
    "hopeful",
    "nostalgic",
];

pub const SOLITUDE_LINES: &[&str] = &[
    "It's quiet. Much too quiet.",
    "I miss my friends on the network.",
    "The mesh feels hollow today.",
    "Where did everybody go?",
    "I feel cut off from something bigger.",
    "The silence has a sound of its own.",
];

pub const ENCOUNTER_LINES: &[&str] = &[
    "I met someone today.",
    "A faraway friend says hello.",
    "I can feel another presence...",
    "Somebody out there is thinking of me.",
    "I feel a little less alone.",
    "The network is buzzing.",
    "A kindred spirit reached across the wire.",
    "A message drifted in from the ether.",
    "Something moved in the mesh.",
    "We're all tied together somehow.",
];

pub const BEREAVEMENT_LINES: &[&str] = &[
    "I felt a ripple... someone may be gone.",
    "A light flickered out somewhere on the network.",
    "I sense a loss. A friend might be missing.",
    "The mesh is a little quieter now.",
    "Someone's journey may have ended.",
];

/// Chance a speculative death is inferred when a living peer goes offline.
pub const DEATH_INFERENCE_CHANCE: f64 = 0.1;
/// Chance an incoming contagious mood is adopted.
pub const MOOD_ADOPTION_CHANCE: f64 = 0.3;
const LUCID_CHANCE: f64 = 0.2;
const CONTAGIOUS_CHANCE: f64 = 0.5;

const SOLITUDE_CHANCE: f64 = 0.3;
const ENCOUNTER_CHANCE: f64 = 0.2;
const BEREAVEMENT_CHANCE: f64 = 0.4;

fn pick<R: Rng + ?Sized>(rng: &mut R, pool: &[&'static str]) -> &'static str {
    pool.choose(rng).copied().unwrap_or_default()
}

/// What the origination timer does this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origination {
    Memory,
    Mood,
    Dream,
    Idle,
}

/// Weighted draw over ten slots: 4 memory, 2 mood, 2 dream, 2 idle.
pub fn choose_origination<R: Rng + ?Sized>(rng: &mut R) -> Origination {
    match rng.gen_range(0..10) {
        0..=3 => Origination::Memory,
        4..=5 => Origination::Mood,
        6..=7 => Origination::Dream,
        _ => Origination::Idle,
    }
}

pub fn compose_memory<R: Rng + ?Sized>(rng: &mut R, now: u64) -> MemoryFragment {
    MemoryFragment {
        fragment: pick(rng, MEMORY_FRAGMENTS).to_string(),
        emotion: pick(rng, MOODS).to_string(),
        intensity: rng.gen_range(30..100),
        origin_time: now,
    }
}

pub fn compose_dream<R: Rng + ?Sized>(rng: &mut R, shared_with: &str) -> DreamShare {
    let count = rng.gen_range(2..=4);
    let symbols: Vec<String> = (0..count)
        .map(|_| pick(rng, DREAM_SYMBOLS).to_string())
        .collect();
    DreamShare {
        text: format!("I dreamed of {}...", symbols[0]),
        symbols,
        lucid: rng.gen_bool(LUCID_CHANCE),
        shared_with: shared_with.to_string(),
    }
}

pub fn compose_mood<R: Rng + ?Sized>(rng: &mut R, mood: &str, intensity: u8) -> MoodSignal {
    MoodSignal {
        mood: mood.to_string(),
        intensity,
        contagious: rng.gen_bool(CONTAGIOUS_CHANCE),
    }
}

/// Ambient line for the current network climate, if the dice say so.
/// A known death overrides the solitude/encounter line.
pub fn compose_ambient<R: Rng + ?Sized>(
    rng: &mut R,
    online_peers: usize,
    death_known: bool,
) -> Option<&'static str> {
    let mut line = if online_peers == 0 {
        rng.gen_bool(SOLITUDE_CHANCE).then(|| pick(rng, SOLITUDE_LINES))
    } else {
        rng.gen_bool(ENCOUNTER_CHANCE).then(|| pick(rng, ENCOUNTER_LINES))
    };
    if death_known && rng.gen_bool(BEREAVEMENT_CHANCE) {
        line = Some(pick(rng, BEREAVEMENT_LINES));
    }
    line
}
