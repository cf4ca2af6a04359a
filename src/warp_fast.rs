use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

use crate::error::WarpError;
use crate::ratings::{RatingStore, UserRow};
use crate::Flt;

/// Margin a positive item must keep over a negative one.
static MARGIN: Flt = 1.0;

/// A `(user, positive item)` draw together with the item's position inside
/// the user's row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositiveSample {
    pub user: usize,
    pub position: usize,
    pub item: usize,
}

/// Outcome of a violating-negative search. `item` is `None` when the trial
/// budget ran out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Violation {
    pub item: Option<usize>,
    pub trials: usize,
}

/// A sampled WARP triple. `negative_trials` counts draws of the successful
/// attempt only, `total_trials` accumulates over discarded attempts as well.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WarpSample {
    pub user: usize,
    pub positive_item: usize,
    pub negative_item: usize,
    pub negative_trials: usize,
    pub total_trials: usize,
}

#[inline(always)]
pub fn dot(a: ArrayView1<Flt>, b: ArrayView1<Flt>) -> Flt {
    a.dot(&b)
}

#[inline(always)]
fn draw_positive<R: Rng + ?Sized>(store: &RatingStore, threshold: Flt, rng: &mut R) -> Option<PositiveSample> {
    let user = rng.gen_range(0..store.num_users());
    let row = store.row(user);
    if row.is_empty() {
        return None;
    }
    let position = rng.gen_range(0..row.len());
    if row.rating_at(position) >= threshold {
        Some(PositiveSample { user, position, item: row.item_at(position) })
    } else {
        None
    }
}

/// Draws a user uniformly, then a position uniformly inside that user's row,
/// and starts over with a new user whenever the row is empty or the rating is
/// below `threshold`. Users with a larger share of positive ratings are
/// therefore favoured.
///
/// Never returns when no rating reaches `threshold`; see
/// [`RatingStore::has_positive`] and [`try_sample_positive`].
pub fn sample_positive<R: Rng + ?Sized>(store: &RatingStore, threshold: Flt, rng: &mut R) -> PositiveSample {
    loop {
        if let Some(sample) = draw_positive(store, threshold, rng) {
            return sample;
        }
    }
}

/// [`sample_positive`] with at most `max_draws` user draws.
pub fn try_sample_positive<R: Rng + ?Sized>(
    store: &RatingStore,
    threshold: Flt,
    max_draws: usize,
    rng: &mut R,
) -> Result<PositiveSample, WarpError> {
    if store.num_users() == 0 {
        return Err(WarpError::EmptyRatings);
    }
    (0..max_draws)
        .find_map(|_| draw_positive(store, threshold, rng))
        .ok_or(WarpError::PositiveSamplingExhausted { draws: max_draws })
}

#[inline(always)]
fn accepts_negative(row: &UserRow, item: usize, positive_rating: Flt) -> bool {
    match row.position_of(item) {
        None => true,
        Some(position) => row.rating_at(position) < positive_rating,
    }
}

/// Draws an item uniformly from `0..num_items`, with replacement, until it is
/// either unrated by the user or rated strictly below the positive item.
/// The positive item itself always fails the rating test.
///
/// Never returns when the user rated every item at or above the positive
/// rating; see [`try_sample_negative_candidate`].
#[inline(always)]
pub fn sample_negative_candidate<R: Rng + ?Sized>(
    num_items: usize,
    row: &UserRow,
    positive_position: usize,
    rng: &mut R,
) -> usize {
    let positive_rating = row.rating_at(positive_position);
    loop {
        let item = rng.gen_range(0..num_items);
        if accepts_negative(row, item, positive_rating) {
            return item;
        }
    }
}

/// [`sample_negative_candidate`] with at most `max_draws` item draws.
#[inline(always)]
pub fn try_sample_negative_candidate<R: Rng + ?Sized>(
    num_items: usize,
    row: &UserRow,
    positive_position: usize,
    max_draws: usize,
    rng: &mut R,
) -> Option<usize> {
    let positive_rating = row.rating_at(positive_position);
    (0..max_draws)
        .map(|_| rng.gen_range(0..num_items))
        .find(|&item| accepts_negative(row, item, positive_rating))
}

/// Searches for a negative item whose score comes within the unit margin of the
/// positive item's score. At most `max_trials - 1` candidates are drawn; when
/// none violates the margin the result carries no item and `max_trials`.
pub fn sample_violating_negative<R: Rng + ?Sized>(
    user_factors: ArrayView2<Flt>,
    item_factors: ArrayView2<Flt>,
    row: &UserRow,
    positive_position: usize,
    positive_item: usize,
    max_trials: usize,
    rng: &mut R,
) -> Violation {
    let num_items = item_factors.nrows();
    let user_factor = user_factors.row(row.user);
    let positive_score = dot(user_factor, item_factors.row(positive_item));
    for trial in 1..max_trials {
        let item = sample_negative_candidate(num_items, row, positive_position, rng);
        if positive_score - dot(user_factor, item_factors.row(item)) < MARGIN {
            return Violation { item: Some(item), trials: trial };
        }
    }
    Violation { item: None, trials: max_trials }
}

/// [`sample_violating_negative`] where every item draw, rejected candidates
/// included, spends one trial. Always returns within `max_trials - 1` draws.
pub fn try_sample_violating_negative<R: Rng + ?Sized>(
    user_factors: ArrayView2<Flt>,
    item_factors: ArrayView2<Flt>,
    row: &UserRow,
    positive_position: usize,
    positive_item: usize,
    max_trials: usize,
    rng: &mut R,
) -> Violation {
    let num_items = item_factors.nrows();
    let user_factor = user_factors.row(row.user);
    let positive_score = dot(user_factor, item_factors.row(positive_item));
    for trial in 1..max_trials {
        let Some(item) = try_sample_negative_candidate(num_items, row, positive_position, 1, rng) else {
            continue;
        };
        if positive_score - dot(user_factor, item_factors.row(item)) < MARGIN {
            return Violation { item: Some(item), trials: trial };
        }
    }
    Violation { item: None, trials: max_trials }
}

#[inline(always)]
fn warp_attempt<R: Rng + ?Sized>(
    user_factors: ArrayView2<Flt>,
    item_factors: ArrayView2<Flt>,
    store: &RatingStore,
    threshold: Flt,
    max_trials: usize,
    rng: &mut R,
) -> Option<(PositiveSample, Violation)> {
    draw_positive(store, threshold, rng).map(|positive| {
        let violation = try_sample_violating_negative(
            user_factors,
            item_factors,
            &store.row(positive.user),
            positive.position,
            positive.item,
            max_trials,
            rng,
        );
        (positive, violation)
    })
}

/// Draws positives until one of them yields a violating negative. Positives
/// whose search runs out of trials are discarded; their trials still count
/// towards `total_trials`.
///
/// Liveness depends on the data: with no positive rating, or a model that
/// already ranks every positive far enough ahead, this never returns. Use
/// [`try_warp_sample`] for a bounded search.
pub fn warp_sample<R: Rng + ?Sized>(
    user_factors: ArrayView2<Flt>,
    item_factors: ArrayView2<Flt>,
    store: &RatingStore,
    threshold: Flt,
    max_trials: usize,
    rng: &mut R,
) -> WarpSample {
    let mut total_trials = 0;
    loop {
        let positive = sample_positive(store, threshold, rng);
        let violation = sample_violating_negative(
            user_factors,
            item_factors,
            &store.row(positive.user),
            positive.position,
            positive.item,
            max_trials,
            rng,
        );
        total_trials += violation.trials;
        if let Some(negative_item) = violation.item {
            return WarpSample {
                user: positive.user,
                positive_item: positive.item,
                negative_item,
                negative_trials: violation.trials,
                total_trials,
            };
        }
    }
}

/// [`warp_sample`] giving up after `max_attempts` positive draws, rejected
/// draws included. Negative searches use [`try_sample_violating_negative`], so
/// rows without any acceptable negative exhaust their trials instead of
/// spinning.
pub fn try_warp_sample<R: Rng + ?Sized>(
    user_factors: ArrayView2<Flt>,
    item_factors: ArrayView2<Flt>,
    store: &RatingStore,
    threshold: Flt,
    max_trials: usize,
    max_attempts: usize,
    rng: &mut R,
) -> Result<WarpSample, WarpError> {
    if store.num_users() == 0 || item_factors.nrows() == 0 {
        return Err(WarpError::EmptyRatings);
    }
    check_factor_shapes(user_factors, item_factors, store)?;

    let mut total_trials = 0;
    for _ in 0..max_attempts {
        let Some((positive, violation)) =
            warp_attempt(user_factors, item_factors, store, threshold, max_trials, rng)
        else {
            continue;
        };
        total_trials += violation.trials;
        if let Some(negative_item) = violation.item {
            return Ok(WarpSample {
                user: positive.user,
                positive_item: positive.item,
                negative_item,
                negative_trials: violation.trials,
                total_trials,
            });
        }
        tracing::trace!(user = positive.user, item = positive.item, "discarding positive without violation");
    }
    Err(WarpError::WarpSamplingExhausted { attempts: max_attempts, total_trials })
}

pub(crate) fn check_factor_shapes(
    user_factors: ArrayView2<Flt>,
    item_factors: ArrayView2<Flt>,
    store: &RatingStore,
) -> Result<(), WarpError> {
    if user_factors.nrows() < store.num_users() {
        return Err(WarpError::DimensionMismatch { expected: store.num_users(), found: user_factors.nrows() });
    }
    if item_factors.nrows() < store.num_items() {
        return Err(WarpError::DimensionMismatch { expected: store.num_items(), found: item_factors.nrows() });
    }
    if user_factors.ncols() != item_factors.ncols() {
        return Err(WarpError::DimensionMismatch { expected: user_factors.ncols(), found: item_factors.ncols() });
    }
    Ok(())
}

/// Adds `gamma * deltas[k]` to `factors[rows[k]]` for each `k` in order, then
/// projects the row back onto the L2 ball of radius `max_norm`.
///
/// Repeated rows are updated sequentially, each starting from the projected
/// result of the previous occurrence. All shape checks run before any row is
/// written.
pub fn apply_updates(
    factors: &mut Array2<Flt>,
    rows: &[usize],
    deltas: ArrayView2<Flt>,
    gamma: Flt,
    max_norm: Flt,
) -> Result<(), WarpError> {
    if rows.len() != deltas.nrows() {
        return Err(WarpError::LengthMismatch { rows: rows.len(), deltas: deltas.nrows() });
    }
    if deltas.ncols() != factors.ncols() {
        return Err(WarpError::DimensionMismatch { expected: factors.ncols(), found: deltas.ncols() });
    }
    if let Some(&row) = rows.iter().find(|&&row| row >= factors.nrows()) {
        return Err(WarpError::RowOutOfBounds { row, num_rows: factors.nrows() });
    }

    for (&row, delta) in rows.iter().zip(deltas.outer_iter()) {
        let mut factor = factors.row_mut(row);
        factor.scaled_add(gamma, &delta);
        let p = factor.dot(&factor).sqrt() / max_norm;
        if p > 1.0 {
            factor.mapv_inplace(|x| x / p);
        }
    }
    Ok(())
}
