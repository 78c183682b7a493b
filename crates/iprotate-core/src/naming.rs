//! Random, human-readable names for cloud resources created per run.

use rand::Rng;
use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "agile", "bright", "calm", "deft", "eager", "fast", "gold", "happy", "icy", "jolly", "keen",
];
const NOUNS: &[&str] = &[
    "forest", "river", "sky", "wind", "storm", "sun", "moon", "field", "hill", "lake", "wave",
];
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `<adjective>-<noun>-<6 random chars>`, optionally prefixed with `<prefix>-`.
pub fn readable_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("calm");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("sky");
    let name = format!("{adjective}-{noun}-{}", random_suffix(&mut rng, 6));
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}-{name}")
    }
}

/// Short lowercase id used to keep IAM and security-group names unique per run.
pub fn run_id() -> String {
    random_suffix(&mut rand::thread_rng(), 4)
}

/// Names of the identity/network resources created for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub role: String,
    pub instance_profile: String,
    pub security_group: String,
}

impl ResourceNames {
    /// Bootstrap naming: `ssm-role-<run>`, `ssm-profile-<run>`, `deploy-sg-<run>`.
    pub fn bootstrap(run: &str) -> Self {
        Self {
            role: format!("ssm-role-{run}"),
            instance_profile: format!("ssm-profile-{run}"),
            security_group: format!("deploy-sg-{run}"),
        }
    }

    /// Failover naming, distinguishable from bootstrap leftovers in the console.
    pub fn replacement(run: &str) -> Self {
        Self {
            role: format!("ssm-role-replace-{run}"),
            instance_profile: format!("ssm-profile-replace-{run}"),
            security_group: format!("deploy-sg-replace-{run}"),
        }
    }
}

fn random_suffix(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
