//! Side and spot-category choice for one arriving vehicle.
//!
//! Everything here is pure: same inputs, same answer, no I/O.
//!
//! Each vehicle category runs its own priority chain. The congestion
//! override looks only at the general count of a fixed lot per category
//! (RIGHT for disabled, LEFT for everything else), never at the preferred
//! side.
//! That asymmetry models the traffic direction of the two-lot site and is
//! kept exactly as is.

use serde::Serialize;

use crate::model::{Category, Side};
use crate::snapshot::CapacitySnapshot;

/// Where to park: which lot and which kind of spot to consume there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub side: Side,
    pub category: Category,
}

struct Lots<'a> {
    left: &'a CapacitySnapshot,
    right: &'a CapacitySnapshot,
}

impl Lots<'_> {
    fn at(&self, side: Side) -> &CapacitySnapshot {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// First `(side, category)` step in `chain` with free capacity.
    fn first_free(&self, chain: &[(Side, Category)]) -> Option<Side> {
        chain
            .iter()
            .find(|(side, category)| self.at(*side).has_free(*category))
            .map(|(side, _)| *side)
    }
}

/// Pick a lot for a vehicle of `category`, or `None` when neither lot has
/// room for it.
pub fn choose_side(
    category: Category,
    preferred: Side,
    congestion: bool,
    left: &CapacitySnapshot,
    right: &CapacitySnapshot,
) -> Option<Side> {
    let lots = Lots { left, right };
    let other = preferred.other();

    match category {
        Category::Disabled => {
            if congestion && right.has_free(Category::General) {
                return Some(Side::Right);
            }
            lots.first_free(&[
                (preferred, Category::Disabled),
                (preferred, Category::General),
                (other, Category::Disabled),
                (other, Category::General),
            ])
        }
        Category::Electric => {
            if congestion && left.has_free(Category::General) {
                return Some(Side::Left);
            }
            lots.first_free(&[
                (preferred, Category::Electric),
                (other, Category::Electric),
                (preferred, Category::General),
                (other, Category::General),
            ])
        }
        Category::Motorcycle | Category::General => {
            // Always LEFT general, even for motorcycles.
            if congestion && left.has_free(Category::General) {
                return Some(Side::Left);
            }
            lots.first_free(&[(preferred, category), (other, category)])
        }
    }
}

/// Spot category to commit on the chosen lot. Disabled and electric
/// vehicles fall back to a general spot; the others take their own kind only.
pub fn resolve_category(vehicle: Category, chosen: &CapacitySnapshot) -> Option<Category> {
    let fallback = match vehicle {
        Category::Disabled | Category::Electric => Some(Category::General),
        Category::Motorcycle | Category::General => None,
    };
    std::iter::once(vehicle)
        .chain(fallback)
        .find(|c| chosen.has_free(*c))
}

/// Full decision: side first, then the spot category on that side.
pub fn decide(
    category: Category,
    preferred: Side,
    congestion: bool,
    left: &CapacitySnapshot,
    right: &CapacitySnapshot,
) -> Option<Decision> {
    let side = choose_side(category, preferred, congestion, left, right)?;
    let chosen = match side {
        Side::Left => left,
        Side::Right => right,
    };
    let spot_category = resolve_category(category, chosen)?;
    Some(Decision {
        side,
        category: spot_category,
    })
}
