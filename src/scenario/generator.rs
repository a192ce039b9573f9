//! Deterministic scenario instantiation.
//!
//! Selection and stage shuffling use two independent ChaCha8 streams seeded
//! from the same `seed`. Shuffling therefore never depends on whether the
//! template was picked by id or by filter, and a replay that only knows
//! `(scenario_id, seed)` rebuilds the exact stage order.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{ScenarioTemplate, Selector, TemplateStore};
use crate::error::{Result, SimError};
use crate::logging::log_generated;

const SELECT_STREAM: u64 = 0;
const SHUFFLE_STREAM: u64 = 1;

fn rng_for(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Pick one template for `selector` and fix every randomized element.
pub fn generate(store: &TemplateStore, selector: &Selector, seed: u64) -> Result<ScenarioTemplate> {
    let chosen = match selector {
        Selector::Id(id) => store.get(id)?,
        Selector::Filter(filter) => {
            let candidates = store.candidates(filter);
            if candidates.is_empty() {
                return Err(SimError::NotFound(format!(
                    "no scenario matches category={:?} severity={:?}",
                    filter.category.map(|c| c.as_str()),
                    filter.severity.map(|s| s.as_str()),
                )));
            }
            let mut rng = rng_for(seed, SELECT_STREAM);
            candidates[rng.gen_range(0..candidates.len())]
        }
    };

    let mut instance = chosen.clone();
    if instance.shuffle_stages && instance.stages.len() > 1 {
        let mut rng = rng_for(seed, SHUFFLE_STREAM);
        instance.stages.shuffle(&mut rng);
        for (pos, stage) in instance.stages.iter_mut().enumerate() {
            stage.index = pos;
        }
    }
    log_generated(&instance.id, seed, instance.shuffle_stages, instance.stages.len());
    Ok(instance)
}
