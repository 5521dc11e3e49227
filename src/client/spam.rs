//! Junk game-log text for the `spam` command

use rand::seq::SliceRandom;
use rand::Rng;

const PHRASES: &[&str] = &[
    "Never interrupt your enemy when they are making a mistake.",
    "The hardest thing of all for a soldier is to retreat.",
    "A soldier will fight long and hard for a bit of colored ribbon.",
    "It should be the duty of every soldier to reload at every opportunity.",
    "Retreat and try again? I think not.",
    "Sometimes the best offense is a good defense.",
    "Victory belongs to the most persevering.",
    "The art of war is simple enough. Find out where your enemy is.",
    "In war there is no prize for the runner-up.",
    "Let the enemy come, our artillery is bored.",
];

/// Pick one phrase
pub fn malicious_log<R: Rng + ?Sized>(rng: &mut R) -> String {
    PHRASES
        .choose(rng)
        .copied()
        .unwrap_or(PHRASES[0])
        .to_string()
}
