use lexigrid_protocol::{Letter, Tile, TileId, LETTER_COUNT};
use rand::Rng;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum BagError {
    #[error("requested {requested} tiles but only {remaining} remain")]
    Exhausted { requested: u32, remaining: u32 },
}

/// Multiset of undrawn tiles, tracked as a remaining count per letter.
#[derive(Clone, Debug)]
pub struct TileBag {
    initial: [u32; LETTER_COUNT],
    remaining: [u32; LETTER_COUNT],
    next_tile_id: u32,
}

impl TileBag {
    /// Standard 98-tile distribution.
    pub fn standard() -> Self {
        Self::from_counts(Letter::all().map(|l| (l, u32::from(l.initial_count()))))
    }

    /// Bag holding exactly the given counts (letters not listed start at zero).
    pub fn from_counts(counts: impl IntoIterator<Item = (Letter, u32)>) -> Self {
        let mut initial = [0; LETTER_COUNT];
        for (letter, count) in counts {
            initial[letter.index()] += count;
        }
        Self {
            initial,
            remaining: initial,
            next_tile_id: 0,
        }
    }

    pub fn remaining(&self, letter: Letter) -> u32 {
        self.remaining[letter.index()]
    }

    pub fn initial(&self, letter: Letter) -> u32 {
        self.initial[letter.index()]
    }

    pub fn drawn(&self, letter: Letter) -> u32 {
        self.initial[letter.index()] - self.remaining[letter.index()]
    }

    pub fn total_remaining(&self) -> u32 {
        self.remaining.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_remaining() == 0
    }

    /// Draw `n` tiles without replacement.
    ///
    /// Letters are picked by rejection sampling: a category is chosen uniformly and
    /// accepted only while it still has tiles. Fails without drawing anything when
    /// fewer than `n` tiles remain.
    pub fn draw<R: Rng>(&mut self, n: u32, rng: &mut R) -> Result<Vec<Tile>, BagError> {
        let remaining = self.total_remaining();
        if remaining < n {
            return Err(BagError::Exhausted {
                requested: n,
                remaining,
            });
        }

        let mut tiles = Vec::with_capacity(n as usize);
        while tiles.len() < n as usize {
            let index = rng.gen_range(0..LETTER_COUNT);
            if self.remaining[index] == 0 {
                continue;
            }
            self.remaining[index] -= 1;

            let Some(letter) = Letter::from_index(index) else {
                continue;
            };
            let id = TileId(self.next_tile_id);
            self.next_tile_id += 1;
            tiles.push(Tile::new(id, letter));
        }
        Ok(tiles)
    }
}

impl Default for TileBag {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn letter(c: char) -> Letter {
        Letter::from_char(c).unwrap()
    }

    #[test]
    fn conservation_holds_through_draws() {
        let mut bag = TileBag::standard();
        let mut rng = StdRng::seed_from_u64(7);
        let mut drawn_by_letter = [0u32; LETTER_COUNT];

        for _ in 0..13 {
            for tile in bag.draw(7, &mut rng).unwrap() {
                drawn_by_letter[tile.letter.index()] += 1;
            }
            for l in Letter::all() {
                assert_eq!(drawn_by_letter[l.index()], bag.drawn(l));
                assert_eq!(bag.drawn(l) + bag.remaining(l), bag.initial(l));
            }
        }
        assert_eq!(bag.total_remaining(), 98 - 91);
    }

    #[test]
    fn exhausted_draw_is_reported_not_truncated() {
        let mut bag = TileBag::from_counts([(letter('Z'), 1)]);
        let mut rng = StdRng::seed_from_u64(1);

        let err = bag.draw(2, &mut rng).unwrap_err();
        assert_eq!(
            err,
            BagError::Exhausted {
                requested: 2,
                remaining: 1
            }
        );
        // Nothing was taken.
        assert_eq!(bag.remaining(letter('Z')), 1);
    }

    #[test]
    fn last_z_and_one_other_can_be_drawn() {
        let mut bag = TileBag::from_counts([(letter('Z'), 1), (letter('E'), 1)]);
        let mut rng = StdRng::seed_from_u64(42);

        let tiles = bag.draw(2, &mut rng).unwrap();
        let mut letters: Vec<char> = tiles.iter().map(|t| t.letter.as_char()).collect();
        letters.sort_unstable();
        assert_eq!(letters, vec!['E', 'Z']);
        assert!(bag.is_empty());

        assert!(matches!(
            bag.draw(1, &mut rng),
            Err(BagError::Exhausted { remaining: 0, .. })
        ));
    }

    #[test]
    fn tile_ids_are_unique() {
        let mut bag = TileBag::standard();
        let mut rng = StdRng::seed_from_u64(3);
        let mut ids: Vec<TileId> = bag.draw(50, &mut rng).unwrap().iter().map(|t| t.id).collect();
        ids.extend(bag.draw(48, &mut rng).unwrap().iter().map(|t| t.id));
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 98);
    }

    #[test]
    fn zero_draw_is_empty() {
        let mut bag = TileBag::from_counts(std::iter::empty());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(bag.draw(0, &mut rng).unwrap().is_empty());
    }
}
