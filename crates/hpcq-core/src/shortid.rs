//! The short, human-readable job id generator (spec §4.2): one adjective,
//! one noun, and a 6-hex-digit CSPRNG suffix, in one of three uniformly
//! chosen layouts. Collision probability is dominated by the 24 random
//! suffix bits; the words exist purely for memorability.

use rand::Rng;

use crate::model::JobId;

/// Biology/astronomy-themed adjectives.
const ADJECTIVES: &[&str] = &[
    "cellular", "symbiotic", "migratory", "nocturnal", "diurnal", "photosynthetic",
    "bioluminescent", "metabolic", "genomic", "evolutionary", "adaptive", "resilient",
    "dormant", "thermophilic", "halophilic", "extremophilic", "migrating", "hibernating",
    "pollinating", "predatory", "herbivorous", "carnivorous", "omnivorous", "amphibious",
    "aquatic", "terrestrial", "arboreal", "burrowing", "gregarious", "solitary",
    "territorial", "camouflaged", "venomous", "bioactive", "enzymatic", "cytoplasmic",
    "chromosomal", "mitochondrial", "ribosomal", "vascular", "nonvascular", "deciduous",
    "evergreen", "perennial", "annual", "flowering", "sporebearing", "filamentous",
    "colonial", "motile", "sessile", "regenerative", "parasitic", "mutualistic",
    "commensal", "keystone", "invasive", "endemic", "migrant", "larval",
    "pupal", "juvenile", "gravid", "torporous", "circadian", "crepuscular",
    "luminous", "stellar", "celestial", "orbital", "planetary", "interstellar",
    "galactic", "cosmic", "lunar", "solar", "nebular", "meteoric",
    "cometary", "asteroidal", "gravitational", "radiant", "binary", "elliptical",
    "spiraling", "expanding", "collapsing", "ionized", "magnetized", "eclipsed",
    "retrograde", "geostationary", "polar", "equatorial", "circumpolar", "heliocentric",
    "geocentric", "primordial", "ancient", "dwarf", "giant", "supergiant",
    "compact", "luminescent", "radiative", "volatile", "frozen", "molten",
    "rocky", "gaseous", "icy", "crystalline", "magnetic", "charged",
    "drifting", "wandering", "spinning", "tidal", "eccentric", "inclined",
    "distant", "nearby", "faint", "bright", "dim", "glowing",
    "pulsing", "flickering", "shimmering", "glimmering", "vast", "boundless",
    "uncharted", "remote", "shadowed", "sunlit", "starlit", "twilight",
];

/// Biology/astronomy-themed nouns.
const NOUNS: &[&str] = &[
    "otter", "falcon", "heron", "lynx", "gecko", "mantis",
    "cricket", "beetle", "spider", "urchin", "octopus", "jellyfish",
    "coral", "lichen", "moss", "fungus", "spore", "seedling",
    "sapling", "fern", "cactus", "orchid", "mycelium", "plankton",
    "krill", "salamander", "newt", "toad", "frog", "tortoise",
    "iguana", "chameleon", "mongoose", "badger", "wolverine", "marten",
    "ferret", "shrew", "vole", "lemur", "tarsier", "pangolin",
    "armadillo", "echidna", "platypus", "narwhal", "dolphin", "manatee",
    "albatross", "condor", "osprey", "kestrel", "sparrow", "finch",
    "hummingbird", "woodpecker", "kingfisher", "pelican", "cormorant", "tern",
    "nebula", "galaxy", "quasar", "pulsar", "comet", "asteroid",
    "meteor", "supernova", "nova", "planet", "moon", "satellite",
    "orbit", "horizon", "eclipse", "constellation", "cluster", "corona",
    "aurora", "magnetosphere", "exoplanet", "dwarfstar", "giantstar", "protostar",
    "blackhole", "wormhole", "singularity", "photon", "neutron", "quark",
    "cosmos", "void", "nebulae", "starfield", "meteorite", "cosmicray",
    "solarwind", "heliopause", "ionosphere", "stratosphere", "troposphere", "mesosphere",
    "tidepool", "reef", "estuary", "wetland", "canopy", "understory",
    "tundra", "savanna", "steppe", "taiga", "delta", "floodplain",
    "glacier", "icefield", "geyser", "hotspring", "fumarole", "caldera",
    "ridge", "trench", "seamount", "atoll", "lagoon", "fjord",
    "basin", "plateau", "mesa", "butte", "canyon", "escarpment",
    "outcrop", "moraine", "drumlin", "esker", "deltafan", "alluvium",
];

const LAYOUTS: [Layout; 3] = [Layout::AdjNoun, Layout::NounAdj, Layout::NounAltNoun];

#[derive(Debug, Clone, Copy)]
enum Layout {
    AdjNoun,
    NounAdj,
    NounAltNoun,
}

fn hex_suffix(rng: &mut impl Rng) -> String {
    let bytes: [u8; 3] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Mint a new short job id using the OS-seeded thread-local CSPRNG.
pub fn mint() -> JobId {
    mint_with(&mut rand::thread_rng())
}

/// Mint a new short job id from an explicit RNG (unit tests only need this
/// to stay deterministic; production code always goes through [`mint`]).
pub fn mint_with(rng: &mut impl Rng) -> JobId {
    let layout = LAYOUTS[rng.gen_range(0..LAYOUTS.len())];
    let adj = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let alt_noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let suffix = hex_suffix(rng);

    let raw = match layout {
        Layout::AdjNoun => format!("{adj}-{noun}-{suffix}"),
        Layout::NounAdj => format!("{noun}-{adj}-{suffix}"),
        Layout::NounAltNoun => format!("{noun}-{alt_noun}-{suffix}"),
    };
    JobId::new_unchecked(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex_lite_check::matches_job_id_shape;

    mod regex_lite_check {
        /// Hand-rolled check of `^[a-z]+-[a-z]+-[0-9a-f]{6}$` without a
        /// regex dependency, since this is the only place that needs it.
        pub fn matches_job_id_shape(s: &str) -> bool {
            let mut parts = s.rsplitn(2, '-');
            let Some(hex) = parts.next() else { return false };
            let Some(rest) = parts.next() else { return false };
            if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
                return false;
            }
            let mut words = rest.splitn(2, '-');
            let (Some(a), Some(b)) = (words.next(), words.next()) else {
                return false;
            };
            !a.is_empty() && !b.is_empty() && a.bytes().all(|c| c.is_ascii_lowercase()) && b.bytes().all(|c| c.is_ascii_lowercase())
        }
    }

    #[test]
    fn minted_ids_match_spec_shape_and_length() {
        let mut rng = rand::thread_rng();
        for _ in 0..2000 {
            let id = mint_with(&mut rng);
            assert!(matches_job_id_shape(id.as_str()), "bad id: {id}");
            assert!(id.as_str().len() <= 40, "too long: {id}");
        }
    }

    #[test]
    fn word_lists_are_lowercase_ascii_hyphen_safe() {
        for w in ADJECTIVES.iter().chain(NOUNS.iter()) {
            assert!(
                w.bytes().all(|b| (b.is_ascii_lowercase() || b == b'-') && b != b' '),
                "bad word: {w}"
            );
        }
    }
}
