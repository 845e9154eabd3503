use crate::model::{Category, Lot};

/// Free counts of one lot at decision time: capacity minus committed
/// allocations, per category.
///
/// Counts are signed and never clamped. A counter that outgrew its capacity
/// (lenient ghost commits) shows up as a negative count, which every rule
/// in the decision engine treats the same as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub free_general: i64,
    pub free_disabled: i64,
    pub free_electric: i64,
    pub free_motorcycle: i64,
}

impl CapacitySnapshot {
    pub fn new(general: i64, disabled: i64, electric: i64, motorcycle: i64) -> Self {
        Self {
            free_general: general,
            free_disabled: disabled,
            free_electric: electric,
            free_motorcycle: motorcycle,
        }
    }

    pub fn from_lot(lot: &Lot) -> Self {
        let free = |c: Category| i64::from(lot.capacity.get(c)) - i64::from(lot.allocated.get(c));
        Self {
            free_general: free(Category::General),
            free_disabled: free(Category::Disabled),
            free_electric: free(Category::Electric),
            free_motorcycle: free(Category::Motorcycle),
        }
    }

    pub fn free(&self, category: Category) -> i64 {
        match category {
            Category::General => self.free_general,
            Category::Disabled => self.free_disabled,
            Category::Electric => self.free_electric,
            Category::Motorcycle => self.free_motorcycle,
        }
    }

    pub fn has_free(&self, category: Category) -> bool {
        self.free(category) > 0
    }
}
