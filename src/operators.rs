//! Operator overloads for bound types.
//!
//! A type lists the operators it supports in [`UserType::operators`]; each
//! declaration is only callable when the matching `std::ops`, `PartialEq` or
//! `PartialOrd` implementation exists, so unsupported operators fail at
//! compile time. Undeclared operators get no metamethod and the runtime
//! reports its own error when a script uses them.
//!
//! ```ignore
//! impl UserType for Money {
//!     const NAME: &'static str = "Money";
//!
//!     fn operators(ops: &mut OperatorSet<Self>) {
//!         ops.add().eq().lt();
//!     }
//! }
//! ```

use std::marker::PhantomData;
use std::ops::{Add, Div, Mul, Neg, Sub};

use bitflags::bitflags;

use crate::callback::{Callback, Signature};
use crate::convert::ToLuaMulti;
use crate::error::{ConversionError, Error, Result};
use crate::stack::Stack;
use crate::userdata::{UserRef, UserType, borrow};

bitflags! {
    /// The fixed set of operators a bound type can overload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Operators: u8 {
        const ADD = 1 << 0;
        const SUB = 1 << 1;
        const MUL = 1 << 2;
        const DIV = 1 << 3;
        const UNM = 1 << 4;
        const EQ = 1 << 5;
        const LT = 1 << 6;
        const LE = 1 << 7;
    }
}

impl Operators {
    /// Metamethod name for a single operator flag.
    pub fn metamethod(self) -> Option<&'static str> {
        METAMETHODS
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, name)| *name)
    }
}

const METAMETHODS: [(Operators, &str); 8] = [
    (Operators::ADD, "__add"),
    (Operators::SUB, "__sub"),
    (Operators::MUL, "__mul"),
    (Operators::DIV, "__div"),
    (Operators::UNM, "__unm"),
    (Operators::EQ, "__eq"),
    (Operators::LT, "__lt"),
    (Operators::LE, "__le"),
];

impl Operators {
    /// Every single-operator flag with its metamethod name.
    pub fn metamethods() -> impl Iterator<Item = (Operators, &'static str)> {
        METAMETHODS.into_iter()
    }
}

/// Collects operator metamethods declared by a type.
pub struct OperatorSet<T> {
    declared: Operators,
    entries: Vec<(Operators, Callback)>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: UserType> Default for OperatorSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: UserType> OperatorSet<T> {
    pub fn new() -> Self {
        Self {
            declared: Operators::empty(),
            entries: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Operators declared so far.
    pub fn declared(&self) -> Operators {
        self.declared
    }

    pub(crate) fn into_entries(self) -> Vec<(Operators, Callback)> {
        self.entries
    }

    fn insert(&mut self, op: Operators, callback: Callback) -> &mut Self {
        // Redeclaring an operator keeps the latest callback.
        self.entries.retain(|(existing, _)| *existing != op);
        self.declared |= op;
        self.entries.push((op, callback));
        self
    }

    fn binary<R: ToLuaMulti>(
        &mut self,
        op: Operators,
        apply: impl Fn(&T, &T) -> R + 'static,
    ) -> &mut Self {
        let name = op.metamethod().unwrap_or("?");
        let signature = Signature::new(vec![T::NAME, T::NAME]);
        let callback = Callback::new(name, signature, move |stack: &Stack<'_>| {
            let lhs = borrow::<T>(stack, 1).map_err(|error| Error::argument(1, error))?;
            let rhs = borrow::<T>(stack, 2).map_err(|error| Error::argument(2, error))?;
            let result = apply(&*lhs, &*rhs);
            drop(lhs);
            drop(rhs);
            result.push_multi(stack)
        });
        self.insert(op, callback)
    }

    /// `a + b`
    pub fn add(&mut self) -> &mut Self
    where
        T: Add<Output = T> + Clone,
    {
        self.binary(Operators::ADD, |a, b| a.clone() + b.clone())
    }

    /// `a - b`
    pub fn sub(&mut self) -> &mut Self
    where
        T: Sub<Output = T> + Clone,
    {
        self.binary(Operators::SUB, |a, b| a.clone() - b.clone())
    }

    /// `a * b`
    pub fn mul(&mut self) -> &mut Self
    where
        T: Mul<Output = T> + Clone,
    {
        self.binary(Operators::MUL, |a, b| a.clone() * b.clone())
    }

    /// `a / b`
    pub fn div(&mut self) -> &mut Self
    where
        T: Div<Output = T> + Clone,
    {
        self.binary(Operators::DIV, |a, b| a.clone() / b.clone())
    }

    /// `-a`
    pub fn unm(&mut self) -> &mut Self
    where
        T: Neg<Output = T> + Clone,
    {
        let signature = Signature::new(vec![T::NAME]);
        let callback = Callback::new("__unm", signature, |stack: &Stack<'_>| {
            let value = borrow::<T>(stack, 1).map_err(|error| Error::argument(1, error))?;
            let result = -(*value).clone();
            drop(value);
            result.push_multi(stack)
        });
        self.insert(Operators::UNM, callback)
    }

    /// `a == b`
    ///
    /// Comparing with a value of another type is `false`, as it is for
    /// values without `__eq`.
    pub fn eq(&mut self) -> &mut Self
    where
        T: PartialEq,
    {
        let signature = Signature::new(vec![T::NAME, T::NAME]);
        let callback = Callback::new("__eq", signature, |stack: &Stack<'_>| {
            let (Some(lhs), Some(rhs)) = (comparable::<T>(stack, 1)?, comparable::<T>(stack, 2)?)
            else {
                return false.push_multi(stack);
            };
            let equal = *lhs == *rhs;
            drop(lhs);
            drop(rhs);
            equal.push_multi(stack)
        });
        self.insert(Operators::EQ, callback)
    }

    /// `a < b`
    pub fn lt(&mut self) -> &mut Self
    where
        T: PartialOrd,
    {
        self.binary(Operators::LT, |a, b| a < b)
    }

    /// `a <= b`
    pub fn le(&mut self) -> &mut Self
    where
        T: PartialOrd,
    {
        self.binary(Operators::LE, |a, b| a <= b)
    }
}

/// Borrow the operand at `index`, or `None` when it holds another type.
fn comparable<'s, T: UserType>(stack: &Stack<'s>, index: i32) -> Result<Option<UserRef<'s, T>>> {
    match borrow::<T>(stack, index) {
        Ok(value) => Ok(Some(value)),
        Err(Error::Conversion(ConversionError::TypeMismatch { .. })) => Ok(None),
        Err(error) => Err(Error::argument(index, error)),
    }
}
