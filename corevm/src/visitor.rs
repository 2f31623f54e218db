use crate::Value;

/// Record index passed for edges that were not found through a liveness
/// record, e.g. dictionary entries.
pub const NO_RECORD: usize = usize::MAX;

/// The collector's side of a scan.
///
/// Slots are handed out mutably, a moving collector rewrites them in place.
pub trait Visitor {
    fn visit_mut(&mut self, slot: &mut Value);

    /// A stack root, found through the liveness record `record` of the
    /// frame's function.
    fn visit_root(&mut self, slot: &mut Value, record: usize) {
        let _ = record;
        self.visit_mut(slot);
    }
}

pub trait Visitable {
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor);
}

/// Adapts a `(slot, record)` mark callback into a [`Visitor`].
pub struct MarkFn<F>(pub F);

impl<F> Visitor for MarkFn<F>
where
    F: FnMut(&mut Value, usize),
{
    #[inline]
    fn visit_mut(&mut self, slot: &mut Value) {
        (self.0)(slot, NO_RECORD);
    }

    #[inline]
    fn visit_root(&mut self, slot: &mut Value, record: usize) {
        (self.0)(slot, record);
    }
}

impl Visitable for Value {
    #[inline]
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        visitor.visit_mut(self);
    }
}

// fixnum-only payloads, nothing to visit
impl Visitable for i64 {
    #[inline]
    fn visit_edges_mut(&mut self, _visitor: &mut impl Visitor) {}
}

impl<T: Visitable> Visitable for Option<T> {
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        if let Some(inner) = self {
            inner.visit_edges_mut(visitor);
        }
    }
}

impl<T: Visitable> Visitable for Vec<T> {
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        self.iter_mut().for_each(|item| item.visit_edges_mut(visitor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_fn_forwards_record_indices() {
        let mut seen = Vec::new();
        let mut visitor = MarkFn(|slot: &mut Value, record: usize| {
            seen.push((*slot, record));
        });

        let mut a = Value::from_fixnum(1);
        let mut b = Value::from_fixnum(2);
        visitor.visit_root(&mut a, 4);
        visitor.visit_mut(&mut b);

        assert_eq!(
            seen,
            vec![(Value::from_fixnum(1), 4), (Value::from_fixnum(2), NO_RECORD)]
        );
    }

    #[test]
    fn visitors_may_rewrite_slots() {
        let mut values = vec![Some(Value::from_fixnum(1)), None];
        let mut visitor = MarkFn(|slot: &mut Value, _: usize| {
            *slot = Value::from_fixnum(slot.as_fixnum().unwrap_or(0) + 10);
        });
        values.visit_edges_mut(&mut visitor);
        assert_eq!(values, vec![Some(Value::from_fixnum(11)), None]);
    }
}
