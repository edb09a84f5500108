//! Thompson NFA regex engine driven by postfix (reverse Polish) patterns.
//!
//! Based on Russ Cox's article <https://swtch.com/~rsc/regexp/regexp1.html>:
//! each postfix token pushes a partially-wired NFA fragment onto a stack,
//! operators combine the topmost fragments, and matching simulates the
//! finished NFA by carrying a *set* of active states across the input, so
//! runtime stays linear in `input length x automaton size` with no
//! backtracking.
//!
//! # Architecture
//!
//! The pipeline is:
//!
//! ```text
//! pattern &str ──classify──> postfix Symbols ──RegexBuilder──> Regex (state arena)
//! ```
//!
//! Patterns are postfix: `ab.` concatenates, `ab|` alternates, `a?` / `a*` /
//! `a+` repeat. Literals are single letters or digits.
//!
//! The automaton is a flat arena of states addressed by index. During
//! construction a fragment tracks its dangling successor slots as a list of
//! `(state, slot)` patches; combining fragments writes each slot exactly
//! once, and whatever slots survive to the end are wired to the accepting
//! state that every automaton reserves at arena index 0. Because the arena
//! owns all nodes and edges are plain indices, the cyclic graphs produced
//! by `*` and `+` need no reference counting, and the finished [`Regex`] is
//! immutable and freely shareable across threads.
//!
//! Matching is anchored: the whole input must be consumed with the
//! accepting state active. A [`Matcher`] keeps two state lists (current and
//! next) plus a per-state stamp that deduplicates states within one closure
//! pass; the stamp also terminates the closure recursion on the split
//! cycles created by repetition operators.

use std::fmt;
use std::io::Write;
use std::ops::{Index, IndexMut};

use log::debug;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// An error returned when a postfix pattern cannot be compiled.
///
/// All variants are compile-time conditions; matching itself never fails.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A pattern character is neither a literal (letter or digit) nor one
    /// of the five operators `.` `|` `?` `*` `+`.
    #[error("unsupported symbol: {0:?}")]
    UnsupportedSymbol(char),
    /// An operator was applied with too few fragments on the construction
    /// stack (`found` may be zero for a leading operator).
    #[error("operator `{operator}` requires {required} operands, found {found}")]
    MissingOperands {
        operator: Symbol,
        required: usize,
        found: usize,
    },
    /// The pattern ran out of operators: more than one fragment was left
    /// on the construction stack.
    #[error("pattern left {0} unconnected fragments, expected exactly one")]
    UnbalancedPattern(usize),
}

// ---------------------------------------------------------------------------
// Postfix symbols
// ---------------------------------------------------------------------------

/// A single postfix pattern token.
///
/// Operands precede operators, so `ab.` is the concatenation of `a` and
/// `b`, and `ab.c|` matches either `ab` or `c`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Symbol {
    /// A literal character (a letter or digit).
    Literal(char),
    /// `.`: concatenate the two topmost fragments.
    Concat,
    /// `|`: alternate between the two topmost fragments.
    Alternate,
    /// `?`: zero or one occurrence of the topmost fragment.
    ZeroOrOne,
    /// `*`: zero or more occurrences of the topmost fragment.
    ZeroOrMore,
    /// `+`: one or more occurrences of the topmost fragment.
    OneOrMore,
}

impl Symbol {
    /// Classify one pattern character.
    ///
    /// Letters and digits (in the Unicode sense) are literals, the five
    /// operator characters map to their operators, and anything else is an
    /// [`Error::UnsupportedSymbol`].
    pub fn classify(ch: char) -> Result<Self, Error> {
        match ch {
            '.' => Ok(Self::Concat),
            '|' => Ok(Self::Alternate),
            '?' => Ok(Self::ZeroOrOne),
            '*' => Ok(Self::ZeroOrMore),
            '+' => Ok(Self::OneOrMore),
            ch if ch.is_alphanumeric() => Ok(Self::Literal(ch)),
            ch => Err(Error::UnsupportedSymbol(ch)),
        }
    }

    /// How many fragments the symbol pops off the construction stack.
    fn operands(self) -> usize {
        match self {
            Self::Literal(_) => 0,
            Self::Concat | Self::Alternate => 2,
            Self::ZeroOrOne | Self::ZeroOrMore | Self::OneOrMore => 1,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ch = match self {
            Self::Literal(ch) => *ch,
            Self::Concat => '.',
            Self::Alternate => '|',
            Self::ZeroOrOne => '?',
            Self::ZeroOrMore => '*',
            Self::OneOrMore => '+',
        };
        write!(f, "{}", ch)
    }
}

// ---------------------------------------------------------------------------
// NFA states
// ---------------------------------------------------------------------------

/// A single NFA state.
///
/// `Split` states are epsilon states followed eagerly while building the
/// active-state list; `Input` states consume exactly one character; the
/// unique `End` state accepts. A compiled automaton holds exactly one
/// `End`, at [`StateId::END`], so acceptance is an index identity check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Unlabeled fork: both successors are followed without consuming
    /// input.
    Split { top: StateId, bottom: StateId },
    /// Consume one character equal to `symbol`, then continue at `next`.
    Input { symbol: char, next: StateId },
    /// The accepting state.
    End,
}

/// Index into the NFA state array ([`Regex::states`]).
///
/// [`StateId::NONE`] marks successor slots that are still dangling during
/// construction; no slot may hold it once compilation has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct StateId(u32);

impl StateId {
    /// The accepting state, reserved at arena index 0 by the builder.
    const END: Self = Self(0);

    /// Sentinel for successor slots that have not been patched yet.
    const NONE: Self = Self(u32::MAX);

    /// Return the raw index as `usize`. Panics on `NONE` in debug builds.
    #[inline]
    fn idx(self) -> usize {
        debug_assert!(self != Self::NONE, "StateId::NONE used as index");
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `states[state_id]`: typed access to the NFA state array.
impl Index<StateId> for [State] {
    type Output = State;

    #[inline]
    fn index(&self, idx: StateId) -> &State {
        &self[idx.idx()]
    }
}

impl IndexMut<StateId> for [State] {
    #[inline]
    fn index_mut(&mut self, idx: StateId) -> &mut State {
        &mut self[idx.idx()]
    }
}

// ---------------------------------------------------------------------------
// NFA fragments (used during construction)
// ---------------------------------------------------------------------------

/// Which successor slot of a state a [`Patch`] fills.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    /// The `next` slot of an `Input` state.
    Next,
    /// The `bottom` slot of a `Split` state.
    Bottom,
}

/// A dangling successor slot waiting for its target state.
///
/// Applied exactly once: the slot must still hold [`StateId::NONE`] when
/// the target is written.
#[derive(Clone, Copy, Debug)]
struct Patch {
    state: StateId,
    slot: Slot,
}

/// A partially-built sub-automaton: an entry state plus the ordered list
/// of dangling slots (`fringes`) to patch to whatever comes next.
#[derive(Debug)]
struct Fragment {
    start: StateId,
    fringes: Vec<Patch>,
}

impl Fragment {
    fn new(start: StateId, fringes: Vec<Patch>) -> Self {
        Self { start, fringes }
    }
}

// ---------------------------------------------------------------------------
// Compiled regex
// ---------------------------------------------------------------------------

struct StateList(Box<[State]>);

impl fmt::Debug for StateList {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_map().entries(self.0.iter().enumerate()).finish()
    }
}

impl std::ops::Deref for StateList {
    type Target = [State];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A compiled NFA ready for matching.
///
/// Immutable once built: matching never writes to the automaton, so one
/// `Regex` can serve any number of [`Matcher`]s, including from multiple
/// threads at once.
#[derive(Debug)]
pub struct Regex {
    states: StateList,
    start: StateId,
}

impl Regex {
    /// Classify and compile a postfix pattern string.
    ///
    /// Every character goes through [`Symbol::classify`], so the pattern
    /// alphabet is letters and digits plus the operators `.` `|` `?` `*`
    /// `+`. Classification errors surface before any construction error.
    pub fn parse(pattern: &str) -> Result<Self, Error> {
        let symbols = pattern
            .chars()
            .map(Symbol::classify)
            .collect::<Result<Vec<_>, _>>()?;
        Self::compile(symbols)
    }

    /// Compile a postfix symbol sequence with a throwaway [`RegexBuilder`].
    pub fn compile<I>(symbols: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Symbol>,
    {
        RegexBuilder::default().build(symbols)
    }

    /// Match `input` against the whole pattern.
    ///
    /// Rejects as soon as the active-state set empties. This allocates
    /// fresh scratch memory on every call; callers with many inputs should
    /// hold a [`MatcherMemory`] and drive a [`Matcher`] directly.
    pub fn is_match(&self, input: &str) -> bool {
        let mut memory = MatcherMemory::default();
        let mut matcher = memory.matcher(self);
        for ch in input.chars() {
            matcher.step(ch);
            if matcher.is_dead() {
                return false;
            }
        }
        matcher.finish()
    }

    /// Return the total memory footprint (in bytes) of this compiled
    /// regex: the struct itself plus the boxed state arena.
    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.states.len() * std::mem::size_of::<State>()
    }

    /// Emit a Graphviz DOT representation of the NFA.
    ///
    /// `Input` transitions are labeled with their character, `Split`
    /// transitions with an epsilon, and the accepting state is drawn with
    /// a double periphery.
    pub fn to_dot(&self, mut buffer: impl Write) {
        let mut visited = vec![false; self.states.len()];
        writeln!(buffer, "digraph graphname {{").unwrap();
        writeln!(buffer, "\trankdir=LR;").unwrap();
        writeln!(buffer, "\t{} [shape=box];", self.start).unwrap();
        let mut stack = vec![self.start];
        while let Some(s) = stack.pop() {
            let i = s.idx();
            if !visited[i] {
                writeln!(buffer, "\t// [{}] {:?}", s, self.states[s]).unwrap();
                self.write_dot_state(s, &mut buffer, &mut stack);
                visited[i] = true;
            }
        }
        writeln!(buffer, "}}").unwrap();
    }

    fn write_dot_state(&self, idx: StateId, buffer: &mut impl Write, stack: &mut Vec<StateId>) {
        match self.states[idx] {
            State::Split { top, bottom } => {
                stack.push(top);
                writeln!(buffer, "\t{} -> {} [label=\"ε\"];", idx, top).unwrap();
                stack.push(bottom);
                writeln!(buffer, "\t{} -> {} [label=\"ε\"];", idx, bottom).unwrap();
            }
            State::Input { symbol, next } => {
                stack.push(next);
                writeln!(buffer, "\t{} -> {} [label=\"{}\"];", idx, next, symbol).unwrap();
            }
            State::End => {
                writeln!(buffer, "\t{} [peripheries=2];", idx).unwrap();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// NFA builder (postfix symbols -> NFA)
// ---------------------------------------------------------------------------

/// Builds a compiled [`Regex`] from a postfix symbol sequence.
///
/// Each symbol is consumed by [`apply`](Self::apply), which pops its
/// operand fragments, allocates any new states, and pushes the combined
/// fragment; [`build`](Self::build) drives the loop and wires the final
/// fragment's fringes to the accepting state.
///
/// The builder is reusable: `build` clears the scratch buffers on entry,
/// so one builder can compile many patterns while retaining heap capacity.
#[derive(Debug, Default)]
pub struct RegexBuilder {
    states: Vec<State>,
    stack: Vec<Fragment>,
}

impl RegexBuilder {
    /// Push a new NFA state and return its index.
    fn state(&mut self, state: State) -> StateId {
        let idx = StateId(self.states.len() as u32);
        self.states.push(state);
        idx
    }

    /// Write `target` into the dangling slot described by `patch`.
    ///
    /// Every fringe is patched exactly once. Finding anything other than
    /// [`StateId::NONE`] in the slot means the same fringe was wired
    /// twice, which is a builder bug, not a pattern error.
    fn patch(&mut self, patch: Patch, target: StateId) {
        let slot = match (patch.slot, &mut self.states.as_mut_slice()[patch.state]) {
            (Slot::Next, State::Input { next, .. }) => next,
            (Slot::Bottom, State::Split { bottom, .. }) => bottom,
            (slot, state) => panic!("patch: no {:?} slot on {:?}", slot, state),
        };
        assert_eq!(*slot, StateId::NONE, "fringe {:?} patched twice", patch);
        *slot = target;
    }

    /// Consume one postfix symbol: pop its operands, push the combined
    /// fragment.
    fn apply(&mut self, symbol: Symbol) -> Result<(), Error> {
        let required = symbol.operands();
        if self.stack.len() < required {
            return Err(Error::MissingOperands {
                operator: symbol,
                required,
                found: self.stack.len(),
            });
        }

        let fragment = match symbol {
            Symbol::Literal(symbol) => {
                // Symbols can be built directly, bypassing `classify`, so
                // the literal alphabet is enforced again here.
                if !symbol.is_alphanumeric() {
                    return Err(Error::UnsupportedSymbol(symbol));
                }
                let idx = self.state(State::Input {
                    symbol,
                    next: StateId::NONE,
                });
                Fragment::new(
                    idx,
                    vec![Patch {
                        state: idx,
                        slot: Slot::Next,
                    }],
                )
            }
            Symbol::Concat => {
                let e2 = self.stack.pop().unwrap();
                let e1 = self.stack.pop().unwrap();
                for patch in e1.fringes {
                    self.patch(patch, e2.start);
                }
                Fragment::new(e1.start, e2.fringes)
            }
            Symbol::Alternate => {
                let e2 = self.stack.pop().unwrap();
                let e1 = self.stack.pop().unwrap();
                let s = self.state(State::Split {
                    top: e1.start,
                    bottom: e2.start,
                });
                let mut fringes = e1.fringes;
                fringes.extend(e2.fringes);
                Fragment::new(s, fringes)
            }
            Symbol::ZeroOrOne => {
                let e = self.stack.pop().unwrap();
                let s = self.state(State::Split {
                    top: e.start,
                    bottom: StateId::NONE,
                });
                let mut fringes = e.fringes;
                fringes.push(Patch {
                    state: s,
                    slot: Slot::Bottom,
                });
                Fragment::new(s, fringes)
            }
            Symbol::ZeroOrMore => {
                let e = self.stack.pop().unwrap();
                let s = self.state(State::Split {
                    top: e.start,
                    bottom: StateId::NONE,
                });
                // Loop back: repeating the body returns to the split.
                for patch in e.fringes {
                    self.patch(patch, s);
                }
                Fragment::new(
                    s,
                    vec![Patch {
                        state: s,
                        slot: Slot::Bottom,
                    }],
                )
            }
            Symbol::OneOrMore => {
                let e = self.stack.pop().unwrap();
                let s = self.state(State::Split {
                    top: e.start,
                    bottom: StateId::NONE,
                });
                for patch in e.fringes {
                    self.patch(patch, s);
                }
                // Same loop as `*`, but entry goes through the body first.
                Fragment::new(
                    e.start,
                    vec![Patch {
                        state: s,
                        slot: Slot::Bottom,
                    }],
                )
            }
        };
        self.stack.push(fragment);
        Ok(())
    }

    /// Compile a postfix symbol sequence into a ready-to-match [`Regex`].
    pub fn build<I>(&mut self, symbols: I) -> Result<Regex, Error>
    where
        I: IntoIterator<Item = Symbol>,
    {
        self.states.clear();
        self.stack.clear();

        // Index 0 is the shared accepting state, so acceptance checks are
        // an identity comparison against StateId::END.
        self.state(State::End);

        let mut consumed = 0usize;
        for symbol in symbols {
            self.apply(symbol)?;
            consumed += 1;
        }

        // Handle the empty-pattern case: no fragments were produced, so
        // the automaton is the bare accepting state and matches only the
        // empty string.
        let start = if let Some(e) = self.stack.pop() {
            if !self.stack.is_empty() {
                return Err(Error::UnbalancedPattern(self.stack.len() + 1));
            }
            for patch in e.fringes {
                self.patch(patch, StateId::END);
            }
            e.start
        } else {
            StateId::END
        };

        debug_assert!(
            self.states.iter().all(|state| match *state {
                State::Split { top, bottom } =>
                    top != StateId::NONE && bottom != StateId::NONE,
                State::Input { next, .. } => next != StateId::NONE,
                State::End => true,
            }),
            "dangling successor slot after compilation"
        );

        debug!(
            "compiled {} symbols into {} states",
            consumed,
            self.states.len()
        );

        Ok(Regex {
            states: StateList(self.states.to_vec().into_boxed_slice()),
            start,
        })
    }
}

// ---------------------------------------------------------------------------
// Matcher (NFA simulation)
// ---------------------------------------------------------------------------

/// Reusable memory for [`Matcher`]. Create once, call
/// [`matcher`](Self::matcher) for each match to run.
#[derive(Debug, Default)]
pub struct MatcherMemory {
    /// Per-state: the `listid` when the state was last added. Used for
    /// O(1) deduplication in `add_state`.
    lastlist: Vec<usize>,
    /// Current and next state lists (swapped each step).
    clist: Vec<StateId>,
    nlist: Vec<StateId>,
}

impl MatcherMemory {
    pub fn matcher<'a>(&'a mut self, regex: &'a Regex) -> Matcher<'a> {
        self.lastlist.clear();
        self.lastlist.resize(regex.states.len(), usize::MAX);
        self.clist.clear();
        self.nlist.clear();

        let mut m = Matcher {
            states: &regex.states,
            lastlist: &mut self.lastlist,
            listid: 0,
            clist: &mut self.clist,
            nlist: &mut self.nlist,
        };

        m.startlist(regex.start);
        m
    }
}

/// Runs one anchored Thompson NFA simulation.
///
/// The active-state list only ever holds `Input` and `End` states;
/// `Split` states are expanded away by [`add_state`](Self::add_state) as
/// the list is built.
#[derive(Debug)]
pub struct Matcher<'a> {
    states: &'a [State],
    /// Per-state deduplication stamp (compared against `listid`).
    lastlist: &'a mut [usize],
    /// Monotonically increasing step ID.
    listid: usize,
    /// Current active state list.
    clist: &'a mut Vec<StateId>,
    /// Next active state list (built during a step).
    nlist: &'a mut Vec<StateId>,
}

impl<'a> Matcher<'a> {
    /// Compute the initial state list by following all epsilon transitions
    /// from `start`.
    #[inline]
    fn startlist(&mut self, start: StateId) {
        self.add_state(start);
        std::mem::swap(self.clist, self.nlist);
        self.listid += 1;
    }

    /// Add `idx` to the next state list, following `Split` edges.
    ///
    /// The `lastlist` stamp deduplicates states within one closure pass.
    /// It also bounds the recursion: the splits built for `*` and `+`
    /// form cycles, and the stamp stops the walk the second time a split
    /// comes around.
    fn add_state(&mut self, idx: StateId) {
        let i = idx.idx();
        if self.lastlist[i] == self.listid {
            return;
        }
        self.lastlist[i] = self.listid;
        match self.states[idx] {
            State::Split { top, bottom } => {
                self.add_state(top);
                self.add_state(bottom);
            }
            State::Input { .. } | State::End => self.nlist.push(idx),
        }
    }

    /// Advance the simulation by one input character.
    ///
    /// For each state in `clist`, if `ch` matches an `Input` state, its
    /// successor is expanded through [`add_state`](Self::add_state) into
    /// the next list. `End` states lapse: the pattern is anchored, so a
    /// match that ends before the input does is no match at all.
    ///
    /// # Panics
    ///
    /// If a `Split` state is found in `clist`. `add_state` expands those
    /// away, so their presence means the active list was corrupted.
    pub fn step(&mut self, ch: char) {
        self.nlist.clear();
        let clist = std::mem::take(self.clist);

        for &idx in &clist {
            match self.states[idx] {
                State::Input { symbol, next } if symbol == ch => self.add_state(next),
                State::Input { .. } | State::End => {}
                State::Split { .. } => unreachable!("Split state {} in active list", idx),
            }
        }

        *self.clist = std::mem::replace(self.nlist, clist);
        self.listid += 1;
    }

    /// Feed an entire string through the matcher, one character at a time.
    pub fn chunk(&mut self, input: &str) {
        for ch in input.chars() {
            self.step(ch);
        }
    }

    /// Check whether the active list has emptied.
    ///
    /// Once dead the matcher stays dead, so callers can reject early
    /// instead of feeding the rest of the input.
    pub fn is_dead(&self) -> bool {
        self.clist.is_empty()
    }

    /// Signal end-of-input and return the match verdict: whether the
    /// accepting state is in the final active list (an identity check
    /// against [`StateId::END`]).
    ///
    /// Consumes the matcher, since no further input can be fed after
    /// end-of-input.
    pub fn finish(self) -> bool {
        self.clist.contains(&StateId::END)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
