use ndarray::{Array1, Array2, ArrayView2};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use tqdm::Iter;
use tracing::{debug, warn};

use crate::error::WarpError;
use crate::ratings::RatingStore;
use crate::Flt;
use crate::warp_fast::{
    apply_updates, check_factor_shapes, dot, sample_positive, sample_violating_negative,
    try_sample_positive, try_warp_sample, warp_sample, PositiveSample, Violation, WarpSample,
};

/// Sampling and update parameters shared by [`WarpSampler`] and [`WarpModel`].
#[derive(Clone, Debug, PartialEq)]
pub struct WarpConfig {
    pub no_components: usize,
    /// Ratings at or above this value count as positive examples.
    pub positive_threshold: Flt,
    /// Budget for one violating-negative search; at most `max_trials - 1` draws.
    pub max_trials: usize,
    /// Caps positive draws per WARP sample. `None` retries without limit.
    pub max_attempts: Option<usize>,
    pub learning_rate: Flt,
    /// Radius of the L2 ball every factor row is projected onto.
    pub max_norm: Flt,
}

impl Default for WarpConfig {
    fn default() -> WarpConfig {
        WarpConfig {
            no_components: 10,
            positive_threshold: 0.0,
            max_trials: 100,
            max_attempts: None,
            learning_rate: 0.05,
            max_norm: 100.0,
        }
    }
}

impl WarpConfig {
    pub fn new_with_params(
        no_components: usize,
        positive_threshold: Flt,
        max_trials: usize,
        max_attempts: Option<usize>,
        learning_rate: Flt,
        max_norm: Flt,
    ) -> Result<WarpConfig, WarpError> {
        if no_components == 0 {
            return Err(WarpError::Configuration("no_components must be positive".to_string()));
        }
        if max_trials == 0 {
            return Err(WarpError::Configuration("max_trials must be positive".to_string()));
        }
        if max_attempts == Some(0) {
            return Err(WarpError::Configuration("max_attempts must be positive when set".to_string()));
        }
        if !(learning_rate > 0.0 && learning_rate.is_finite()) {
            return Err(WarpError::Configuration(format!("invalid learning rate: {}", learning_rate)));
        }
        if !(max_norm > 0.0 && max_norm.is_finite()) {
            return Err(WarpError::Configuration(format!("invalid max norm: {}", max_norm)));
        }
        Ok(WarpConfig {
            no_components,
            positive_threshold,
            max_trials,
            max_attempts,
            learning_rate,
            max_norm,
        })
    }
}

pub struct RandomState {
    pub(crate) rng: Isaac64Rng,
}

impl RandomState {
    pub fn default() -> RandomState {
        RandomState { rng: Isaac64Rng::from_entropy() }
    }

    pub fn from_seed(seed: u64) -> RandomState {
        RandomState { rng: Isaac64Rng::seed_from_u64(seed) }
    }
}

/// Draws WARP samples and applies bounded updates with one configuration and
/// one random stream.
pub struct WarpSampler {
    config: WarpConfig,
    random_state: RandomState,
}

impl WarpSampler {
    pub fn new(config: WarpConfig, random_state: RandomState) -> WarpSampler {
        WarpSampler { config, random_state }
    }

    pub fn config(&self) -> &WarpConfig {
        &self.config
    }

    pub fn sample(
        &mut self,
        user_factors: ArrayView2<Flt>,
        item_factors: ArrayView2<Flt>,
        store: &RatingStore,
    ) -> Result<WarpSample, WarpError> {
        let rng = &mut self.random_state.rng;
        match self.config.max_attempts {
            Some(max_attempts) => try_warp_sample(
                user_factors,
                item_factors,
                store,
                self.config.positive_threshold,
                self.config.max_trials,
                max_attempts,
                rng,
            ),
            None => Ok(warp_sample(
                user_factors,
                item_factors,
                store,
                self.config.positive_threshold,
                self.config.max_trials,
                rng,
            )),
        }
    }

    pub fn sample_positive(&mut self, store: &RatingStore) -> Result<PositiveSample, WarpError> {
        let rng = &mut self.random_state.rng;
        match self.config.max_attempts {
            Some(max_draws) => try_sample_positive(store, self.config.positive_threshold, max_draws, rng),
            None => Ok(sample_positive(store, self.config.positive_threshold, rng)),
        }
    }

    pub fn sample_violating_negative(
        &mut self,
        user_factors: ArrayView2<Flt>,
        item_factors: ArrayView2<Flt>,
        store: &RatingStore,
        positive: &PositiveSample,
    ) -> Violation {
        sample_violating_negative(
            user_factors,
            item_factors,
            &store.row(positive.user),
            positive.position,
            positive.item,
            self.config.max_trials,
            &mut self.random_state.rng,
        )
    }

    pub fn update(&self, factors: &mut Array2<Flt>, rows: &[usize], deltas: ArrayView2<Flt>) -> Result<(), WarpError> {
        apply_updates(factors, rows, deltas, self.config.learning_rate, self.config.max_norm)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EpochStats {
    pub samples: usize,
    pub mean_total_trials: f64,
}

/// Reference training loop driving the WARP kernel: one sample and one
/// projected update per rating, per epoch.
pub struct WarpModel {
    sampler: WarpSampler,
    user_factors: Array2<Flt>,
    item_factors: Array2<Flt>,
    warp_loss: Array1<Flt>,
}

impl WarpModel {
    pub fn new(config: WarpConfig, mut random_state: RandomState, no_users: usize, no_items: usize) -> WarpModel {
        let no_components = config.no_components;
        let user_factors = (Array2::random_using(
            (no_users, no_components),
            Uniform::new(0.0 as Flt, 1.0 as Flt),
            &mut random_state.rng,
        ) - 0.5 as Flt)
            / no_components as Flt;
        let item_factors = (Array2::random_using(
            (no_items, no_components),
            Uniform::new(0.0 as Flt, 1.0 as Flt),
            &mut random_state.rng,
        ) - 0.5 as Flt)
            / no_components as Flt;
        // warp_loss[r] = 1 + 1/2 + ... + 1/r
        let mut warp_loss = Array1::<Flt>::zeros(no_items.max(1));
        for r in 1..warp_loss.len() {
            warp_loss[r] = warp_loss[r - 1] + 1.0 / r as Flt;
        }
        debug!(no_users, no_items, no_components, "initialised WARP model");
        WarpModel {
            sampler: WarpSampler::new(config, random_state),
            user_factors,
            item_factors,
            warp_loss,
        }
    }

    pub fn user_factors(&self) -> &Array2<Flt> {
        &self.user_factors
    }

    pub fn item_factors(&self) -> &Array2<Flt> {
        &self.item_factors
    }

    /// Runs `epochs` epochs of up to one WARP step per stored rating and
    /// returns the statistics of the last one. Training continues from the
    /// current factors, so repeated calls resume where the previous one ended.
    ///
    /// With `max_attempts` set, an epoch ends early once no violating pair can
    /// be found; without it, sampling on a converged model never returns.
    pub fn fit(&mut self, store: &RatingStore, epochs: usize, verbose: bool) -> Result<EpochStats, WarpError> {
        check_factor_shapes(self.user_factors.view(), self.item_factors.view(), store)?;
        if store.num_users() == 0 || store.num_items() < 2 {
            return Err(WarpError::EmptyRatings);
        }
        let threshold = self.sampler.config().positive_threshold;
        if !store.has_positive(threshold) {
            return Err(WarpError::NoPositiveExamples { threshold });
        }
        if let Some((user, item)) = store.first_duplicate() {
            warn!(user, item, "duplicate item in user row, lookups use the first entry");
        }

        let mut stats = EpochStats::default();
        for epoch in Self::process(epochs, verbose) {
            stats = self.run_epoch(store)?;
            debug!(epoch, samples = stats.samples, mean_total_trials = stats.mean_total_trials, "finished epoch");
        }
        Ok(stats)
    }

    fn run_epoch(&mut self, store: &RatingStore) -> Result<EpochStats, WarpError> {
        let mut samples = 0usize;
        let mut trials = 0usize;
        for _ in 0..store.nnz() {
            let sample = match self.sampler.sample(self.user_factors.view(), self.item_factors.view(), store) {
                Ok(sample) => sample,
                Err(WarpError::WarpSamplingExhausted { attempts, total_trials }) => {
                    debug!(attempts, total_trials, samples, "no violating pair left, ending epoch");
                    break;
                }
                Err(e) => return Err(e),
            };
            samples += 1;
            trials += sample.total_trials;
            self.step(&sample)?;
        }
        Ok(EpochStats {
            samples,
            mean_total_trials: trials as f64 / samples.max(1) as f64,
        })
    }

    fn step(&mut self, sample: &WarpSample) -> Result<(), WarpError> {
        let no_items = self.item_factors.nrows();
        let rank = (no_items - 1) / sample.negative_trials;
        let loss = self.warp_loss[rank];
        let no_components = self.sampler.config().no_components;

        let user = self.user_factors.row(sample.user).to_owned();
        let user_delta = (&self.item_factors.row(sample.positive_item) - &self.item_factors.row(sample.negative_item)) * loss;
        let item_deltas = Array2::from_shape_fn((2, no_components), |(r, c)| {
            if r == 0 { loss * user[c] } else { -loss * user[c] }
        });

        self.sampler.update(
            &mut self.user_factors,
            &[sample.user],
            user_delta.view().insert_axis(ndarray::Axis(0)),
        )?;
        self.sampler.update(
            &mut self.item_factors,
            &[sample.positive_item, sample.negative_item],
            item_deltas.view(),
        )
    }

    /// Scores `items` for `user` by factor dot product.
    pub fn predict(&self, user: usize, items: &[usize]) -> Result<Vec<Flt>, WarpError> {
        if user >= self.user_factors.nrows() {
            return Err(WarpError::UserOutOfBounds { user, num_users: self.user_factors.nrows() });
        }
        let user_factor = self.user_factors.row(user);
        items
            .iter()
            .map(|&item| {
                if item >= self.item_factors.nrows() {
                    return Err(WarpError::RowOutOfBounds { row: item, num_rows: self.item_factors.nrows() });
                }
                Ok(dot(user_factor, self.item_factors.row(item)))
            })
            .collect()
    }

    fn process(n: usize, verbose: bool) -> Box<dyn Iterator<Item = usize>> {
        if verbose {
            Box::new((0..n).tqdm())
        } else {
            Box::new(0..n)
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra_sparse::{CooMatrix, CsrMatrix};
    use ndarray::array;

    use super::*;

    fn block_ratings() -> CsrMatrix<Flt> {
        // users 0..4 like items 0..4, users 4..8 like items 4..8
        let mut coo = CooMatrix::new(8, 8);
        for user in 0..8 {
            let block = (user / 4) * 4;
            for item in block..block + 3 {
                coo.push(user, (item + user) % 4 + block, 1.0);
            }
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn test_config_rejects_invalid_params() {
        assert!(WarpConfig::new_with_params(0, 0.0, 10, None, 0.1, 1.0).is_err());
        assert!(WarpConfig::new_with_params(5, 0.0, 0, None, 0.1, 1.0).is_err());
        assert!(WarpConfig::new_with_params(5, 0.0, 10, Some(0), 0.1, 1.0).is_err());
        assert!(WarpConfig::new_with_params(5, 0.0, 10, None, 0.0, 1.0).is_err());
        assert!(WarpConfig::new_with_params(5, 0.0, 10, None, 0.1, Flt::INFINITY).is_err());
        assert_eq!(
            WarpConfig::new_with_params(10, 0.0, 100, None, 0.05, 100.0).unwrap(),
            WarpConfig::default()
        );
    }

    #[test]
    fn test_seeded_samplers_agree() {
        let ratings = block_ratings();
        let store = RatingStore::from_csr(&ratings);
        let user_factors = Array2::<Flt>::zeros((8, 3));
        let item_factors = Array2::<Flt>::zeros((8, 3));
        let mut a = WarpSampler::new(WarpConfig::default(), RandomState::from_seed(42));
        let mut b = WarpSampler::new(WarpConfig::default(), RandomState::from_seed(42));
        for _ in 0..50 {
            assert_eq!(
                a.sample(user_factors.view(), item_factors.view(), &store).unwrap(),
                b.sample(user_factors.view(), item_factors.view(), &store).unwrap()
            );
        }
    }

    #[test]
    fn test_bounded_sampler_reports_missing_positives() {
        let ratings = block_ratings();
        let store = RatingStore::from_csr(&ratings);
        let config = WarpConfig { positive_threshold: 2.0, max_attempts: Some(20), ..WarpConfig::default() };
        let mut sampler = WarpSampler::new(config, RandomState::from_seed(1));
        assert_eq!(
            sampler.sample_positive(&store),
            Err(WarpError::PositiveSamplingExhausted { draws: 20 })
        );
        let factors = Array2::<Flt>::zeros((8, 10));
        assert_eq!(
            sampler.sample(factors.view(), factors.view(), &store),
            Err(WarpError::WarpSamplingExhausted { attempts: 20, total_trials: 0 })
        );
    }

    #[test]
    fn test_sampler_violation_after_positive() {
        let ratings = block_ratings();
        let store = RatingStore::from_csr(&ratings);
        let config = WarpConfig { max_trials: 6, ..WarpConfig::default() };
        let mut sampler = WarpSampler::new(config, RandomState::from_seed(12));

        let zeros = Array2::<Flt>::zeros((8, 2));
        let positive = sampler.sample_positive(&store).unwrap();
        let violation = sampler.sample_violating_negative(zeros.view(), zeros.view(), &store, &positive);
        assert_eq!(violation.trials, 1);
        let negative = violation.item.unwrap();
        assert_eq!(store.row(positive.user).rating_of(negative), None);

        // every score ties with the positive pushed far ahead: budget runs out
        let user_factors = Array2::<Flt>::from_elem((8, 1), 1.0);
        let mut item_factors = Array2::<Flt>::zeros((8, 1));
        item_factors[[positive.item, 0]] = 10.0;
        assert_eq!(
            sampler.sample_violating_negative(user_factors.view(), item_factors.view(), &store, &positive),
            Violation { item: None, trials: 6 }
        );
    }

    #[test]
    fn test_capped_fit_stops_on_saturated_rows() {
        let (offsets, items, values) = ([0, 3], [0, 1, 2], [5.0, 5.0, 5.0]);
        let store = RatingStore::try_new(3, &offsets, &items, &values).unwrap();
        let config = WarpConfig { max_attempts: Some(10), ..WarpConfig::default() };
        let mut model = WarpModel::new(config, RandomState::from_seed(2), 1, 3);
        assert_eq!(
            model.fit(&store, 2, false),
            Ok(EpochStats { samples: 0, mean_total_trials: 0.0 })
        );
    }

    #[test]
    fn test_sampler_update_uses_config() {
        let config = WarpConfig { learning_rate: 2.0, max_norm: 5.0, ..WarpConfig::default() };
        let sampler = WarpSampler::new(config, RandomState::from_seed(1));
        let mut factors = array![[0.0, 0.0]];
        sampler.update(&mut factors, &[0], array![[3.0, 4.0]].view()).unwrap();
        assert!((factors[[0, 0]] - 3.0).abs() < 1e-5);
        assert!((factors[[0, 1]] - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_fit_ranks_liked_items_first() {
        let ratings = block_ratings();
        let store = RatingStore::from_csr(&ratings);
        let config = WarpConfig {
            no_components: 4,
            learning_rate: 0.1,
            max_norm: 5.0,
            max_attempts: Some(200),
            ..WarpConfig::default()
        };
        let mut model = WarpModel::new(config, RandomState::from_seed(7), 8, 8);
        let first = model.fit(&store, 1, false).unwrap();
        assert_eq!(first.samples, store.nnz());
        assert!(first.mean_total_trials >= 1.0);
        let last = model.fit(&store, 100, false).unwrap();
        assert!(last.samples <= store.nnz());

        for row in model.user_factors().outer_iter().chain(model.item_factors().outer_iter()) {
            assert!(row.dot(&row).sqrt() <= 5.0 + 1e-4);
        }
        let scores = model.predict(0, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        let liked = scores[..3].iter().cloned().fold(Flt::INFINITY, Flt::min);
        let other_block = scores[4..].iter().cloned().fold(Flt::NEG_INFINITY, Flt::max);
        assert!(liked > other_block, "scores {:?}", scores);
    }

    #[test]
    fn test_fit_validates_input() {
        let ratings = block_ratings();
        let store = RatingStore::from_csr(&ratings);
        let mut small = WarpModel::new(WarpConfig::default(), RandomState::from_seed(3), 4, 8);
        assert!(matches!(small.fit(&store, 1, false), Err(WarpError::DimensionMismatch { .. })));

        let config = WarpConfig { positive_threshold: 3.0, ..WarpConfig::default() };
        let mut model = WarpModel::new(config, RandomState::from_seed(3), 8, 8);
        assert_eq!(model.fit(&store, 1, false), Err(WarpError::NoPositiveExamples { threshold: 3.0 }));
        assert!(model.predict(8, &[0]).is_err());
        assert!(model.predict(0, &[8]).is_err());
    }
}
