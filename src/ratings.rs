use nalgebra_sparse::CsrMatrix;

use crate::error::WarpError;
use crate::Flt;

/// Read-only view over a user x item rating matrix in CSR layout.
///
/// User `u` owns `values[row_offsets[u]..row_offsets[u + 1]]` and the matching
/// slice of `col_indices`. Items inside a row need not be sorted. Duplicate
/// items are tolerated; lookups resolve to the first occurrence.
#[derive(Clone, Copy, Debug)]
pub struct RatingStore<'a> {
    row_offsets: &'a [usize],
    col_indices: &'a [usize],
    values: &'a [Flt],
    num_items: usize,
}

/// One user's slice of a [`RatingStore`].
#[derive(Clone, Copy, Debug)]
pub struct UserRow<'a> {
    pub user: usize,
    pub items: &'a [usize],
    pub values: &'a [Flt],
}

impl<'a> RatingStore<'a> {
    pub fn try_new(
        num_items: usize,
        row_offsets: &'a [usize],
        col_indices: &'a [usize],
        values: &'a [Flt],
    ) -> Result<RatingStore<'a>, WarpError> {
        if row_offsets.first() != Some(&0) {
            return Err(WarpError::InvalidRatings("row offsets must start at 0".to_string()));
        }
        if row_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(WarpError::InvalidRatings("row offsets must be non-decreasing".to_string()));
        }
        if col_indices.len() != values.len() {
            return Err(WarpError::InvalidRatings(format!(
                "{} column indices for {} values",
                col_indices.len(),
                values.len()
            )));
        }
        if row_offsets[row_offsets.len() - 1] != values.len() {
            return Err(WarpError::InvalidRatings(format!(
                "last row offset {} does not match {} values",
                row_offsets[row_offsets.len() - 1],
                values.len()
            )));
        }
        if let Some(&item) = col_indices.iter().find(|&&item| item >= num_items) {
            return Err(WarpError::InvalidRatings(format!(
                "item {} is out of bounds for {} items",
                item, num_items
            )));
        }
        Ok(RatingStore { row_offsets, col_indices, values, num_items })
    }

    /// Borrows the arrays of an already validated CSR matrix.
    pub fn from_csr(ratings: &'a CsrMatrix<Flt>) -> RatingStore<'a> {
        RatingStore {
            row_offsets: ratings.row_offsets(),
            col_indices: ratings.col_indices(),
            values: ratings.values(),
            num_items: ratings.ncols(),
        }
    }

    pub fn num_users(&self) -> usize {
        self.row_offsets.len() - 1
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Panics when `user >= self.num_users()`.
    #[inline(always)]
    pub fn row(&self, user: usize) -> UserRow<'a> {
        let (start, end) = (self.row_offsets[user], self.row_offsets[user + 1]);
        UserRow {
            user,
            items: &self.col_indices[start..end],
            values: &self.values[start..end],
        }
    }

    pub fn try_row(&self, user: usize) -> Result<UserRow<'a>, WarpError> {
        if user >= self.num_users() {
            return Err(WarpError::UserOutOfBounds { user, num_users: self.num_users() });
        }
        Ok(self.row(user))
    }

    /// Whether any rating reaches `threshold`. Positive sampling only
    /// terminates when this holds.
    pub fn has_positive(&self, threshold: Flt) -> bool {
        self.values.iter().any(|&v| v >= threshold)
    }

    /// First `(user, item)` pair stored more than once in the same row.
    pub fn first_duplicate(&self) -> Option<(usize, usize)> {
        (0..self.num_users()).find_map(|user| {
            let row = self.row(user);
            row.items
                .iter()
                .enumerate()
                .find(|&(pos, item)| row.items[..pos].contains(item))
                .map(|(_, &item)| (user, item))
        })
    }
}

impl<'a> UserRow<'a> {
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline(always)]
    pub fn item_at(&self, position: usize) -> usize {
        self.items[position]
    }

    #[inline(always)]
    pub fn rating_at(&self, position: usize) -> Flt {
        self.values[position]
    }

    /// Linear scan; rows are short, so this beats a sorted search in practice.
    #[inline(always)]
    pub fn position_of(&self, item: usize) -> Option<usize> {
        self.items.iter().position(|&i| i == item)
    }

    pub fn rating_of(&self, item: usize) -> Option<Flt> {
        self.position_of(item).map(|pos| self.values[pos])
    }
}

#[cfg(test)]
mod tests {
    use nalgebra_sparse::{CooMatrix, CsrMatrix};

    use super::*;

    #[test]
    fn test_rows_follow_offsets() {
        let offsets = [0, 2, 2, 5];
        let items = [4, 1, 0, 3, 2];
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let store = RatingStore::try_new(5, &offsets, &items, &values).unwrap();

        assert_eq!(store.num_users(), 3);
        assert_eq!(store.nnz(), 5);
        assert!(store.row(1).is_empty());
        let row = store.row(2);
        assert_eq!(row.items, &[0, 3, 2]);
        assert_eq!(row.position_of(3), Some(1));
        assert_eq!(row.rating_of(2), Some(5.0));
        assert_eq!(row.rating_of(4), None);
    }

    #[test]
    fn test_from_csr_matches_matrix() {
        let mut coo = CooMatrix::new(2, 4);
        coo.push(0, 3, 1.0);
        coo.push(1, 0, 2.0);
        coo.push(1, 2, 4.0);
        let csr = CsrMatrix::from(&coo);
        let store = RatingStore::from_csr(&csr);

        assert_eq!(store.num_users(), 2);
        assert_eq!(store.num_items(), 4);
        assert_eq!(store.row(1).rating_of(2), Some(4.0));
        assert_eq!(store.row(0).rating_of(0), None);
    }

    #[test]
    fn test_invalid_layouts_are_rejected() {
        let values = [1.0, 2.0];
        assert!(RatingStore::try_new(3, &[1, 2], &[0, 1], &values).is_err());
        assert!(RatingStore::try_new(3, &[0, 2, 1, 2], &[0, 1], &values).is_err());
        assert!(RatingStore::try_new(3, &[0, 1], &[0, 1], &values).is_err());
        assert!(RatingStore::try_new(3, &[0, 2], &[0], &values).is_err());
        assert!(RatingStore::try_new(3, &[0, 2], &[0, 3], &values).is_err());
        assert!(RatingStore::try_new(3, &[], &[], &[]).is_err());
    }

    #[test]
    fn test_try_row_out_of_bounds() {
        let store = RatingStore::try_new(2, &[0, 1], &[1], &[1.0]).unwrap();
        assert_eq!(
            store.try_row(1).unwrap_err(),
            WarpError::UserOutOfBounds { user: 1, num_users: 1 }
        );
    }

    #[test]
    fn test_duplicates_resolve_to_first_match() {
        let store = RatingStore::try_new(4, &[0, 1, 4], &[2, 3, 1, 3], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(store.first_duplicate(), Some((1, 3)));
        assert_eq!(store.row(1).rating_of(3), Some(2.0));
        assert!(store.has_positive(4.0));
        assert!(!store.has_positive(4.5));
    }
}
