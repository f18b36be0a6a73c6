//! Equality Policies
//!
//! A cell compares every incoming value against its current one and drops
//! the write when they are equal: no staleness, no effect re-runs. Which
//! comparison is used is chosen when the cell is created:
//!
//! | Policy                  | Equal when                                  |
//! |-------------------------|---------------------------------------------|
//! | [`Equality::value`]     | `PartialEq::eq` returns true (the default)  |
//! | [`Equality::identity`]  | both values point at the same allocation    |
//! | [`Equality::never`]     | never; every write propagates               |
//! | [`Equality::custom`]    | the supplied function returns true          |
//!
//! `identity` is meant for values that are replaced wholesale rather than
//! mutated, such as `Rc<[Item]>`: building a new list always notifies, and
//! re-setting the same `Rc` never does, without walking the contents.

use std::fmt;
use std::ops::Deref;

pub struct Equality<T> {
    name: &'static str,
    compare: Option<fn(&T, &T) -> bool>,
}

impl<T: PartialEq> Equality<T> {
    pub fn value() -> Self {
        Self {
            name: "value",
            compare: Some(<T as PartialEq>::eq as fn(&T, &T) -> bool),
        }
    }
}

impl<T: Deref> Equality<T> {
    pub fn identity() -> Self {
        Self {
            name: "identity",
            compare: Some(same_target::<T> as fn(&T, &T) -> bool),
        }
    }
}

impl<T> Equality<T> {
    pub fn never() -> Self {
        Self {
            name: "never",
            compare: None,
        }
    }

    pub fn custom(name: &'static str, compare: fn(&T, &T) -> bool) -> Self {
        Self {
            name,
            compare: Some(compare),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_equal(&self, current: &T, next: &T) -> bool {
        self.compare.map_or(false, |compare| compare(current, next))
    }
}

fn same_target<T: Deref>(a: &T, b: &T) -> bool {
    std::ptr::eq(&**a, &**b)
}

impl<T> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Equality").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn value_uses_partial_eq() {
        let eq = Equality::<Vec<i32>>::value();
        assert!(eq.is_equal(&vec![1, 2], &vec![1, 2]));
        assert!(!eq.is_equal(&vec![1, 2], &vec![2, 1]));
    }

    #[test]
    fn identity_ignores_contents() {
        let eq = Equality::<Rc<Vec<i32>>>::identity();
        let list = Rc::new(vec![1, 2, 3]);
        let copy = Rc::new(vec![1, 2, 3]);

        assert!(eq.is_equal(&list, &Rc::clone(&list)));
        assert!(!eq.is_equal(&list, &copy));
    }

    #[test]
    fn identity_on_unsized_targets() {
        let eq = Equality::<Rc<str>>::identity();
        let name: Rc<str> = Rc::from("ada");
        assert!(eq.is_equal(&name, &name.clone()));
        assert!(!eq.is_equal(&name, &Rc::from("ada")));
    }

    #[test]
    fn never_always_propagates() {
        let eq = Equality::<i32>::never();
        assert!(!eq.is_equal(&1, &1));
        assert_eq!(eq.name(), "never");
    }

    #[test]
    fn custom_comparison() {
        let eq = Equality::<f64>::custom("close", |a, b| (a - b).abs() < 0.01);
        assert!(eq.is_equal(&1.0, &1.001));
        assert!(!eq.is_equal(&1.0, &1.1));
        assert_eq!(format!("{eq:?}"), "Equality(\"close\")");
    }
}
