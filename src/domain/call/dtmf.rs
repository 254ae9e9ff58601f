//! DTMF tone serialization
//!
//! The modem can only play one tone burst at a time and does not say which
//! call a completion belongs to, so every call and the conference keep a
//! small queue: one string in flight, one pending. Digits entered while a
//! burst is playing coalesce into the pending string.

use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use std::collections::VecDeque;

/// DTMF digit representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtmfDigit {
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Star,
    Pound,
}

impl DtmfDigit {
    /// Convert to character representation
    pub fn to_char(&self) -> char {
        match self {
            DtmfDigit::Zero => '0',
            DtmfDigit::One => '1',
            DtmfDigit::Two => '2',
            DtmfDigit::Three => '3',
            DtmfDigit::Four => '4',
            DtmfDigit::Five => '5',
            DtmfDigit::Six => '6',
            DtmfDigit::Seven => '7',
            DtmfDigit::Eight => '8',
            DtmfDigit::Nine => '9',
            DtmfDigit::Star => '*',
            DtmfDigit::Pound => '#',
        }
    }

    /// Map a keypad event code (0-9, 10 = `*`, 11 = `#`)
    pub fn from_event(code: u8) -> Result<Self> {
        let digit = match code {
            0 => DtmfDigit::Zero,
            1 => DtmfDigit::One,
            2 => DtmfDigit::Two,
            3 => DtmfDigit::Three,
            4 => DtmfDigit::Four,
            5 => DtmfDigit::Five,
            6 => DtmfDigit::Six,
            7 => DtmfDigit::Seven,
            8 => DtmfDigit::Eight,
            9 => DtmfDigit::Nine,
            10 => DtmfDigit::Star,
            11 => DtmfDigit::Pound,
            other => {
                return Err(CallError::InvalidArgument(format!(
                    "invalid DTMF event {}",
                    other
                )))
            }
        };
        Ok(digit)
    }
}

/// What to do after a tone burst completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtmfAction {
    /// Send this string now
    Submit(String),
    /// Send the in-flight string again after the retry delay
    RetryLater,
    Idle,
}

#[derive(Debug, Clone, Default)]
pub struct DtmfQueue {
    /// Front is in flight while `locked`, second entry collects new digits
    pending: VecDeque<String>,
    locked: bool,
    generation: u64,
}

impl DtmfQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a digit. Returns the string to submit if the queue was idle.
    pub fn push(&mut self, digit: DtmfDigit) -> Option<String> {
        if self.pending.len() > 1 {
            if let Some(coalesced) = self.pending.get_mut(1) {
                coalesced.push(digit.to_char());
            }
        } else {
            self.pending.push_back(digit.to_char().to_string());
        }
        self.next()
    }

    /// Lock and return the front string unless something is in flight
    pub fn next(&mut self) -> Option<String> {
        if self.locked {
            return None;
        }
        let front = self.pending.front()?.clone();
        self.locked = true;
        Some(front)
    }

    /// Handle the completion of the in-flight string
    pub fn complete(&mut self, success: bool) -> DtmfAction {
        if !self.locked {
            return DtmfAction::Idle;
        }
        if !success {
            return DtmfAction::RetryLater;
        }
        self.pending.pop_front();
        self.locked = false;
        match self.next() {
            Some(tones) => DtmfAction::Submit(tones),
            None => DtmfAction::Idle,
        }
    }

    /// The string to resend after a failure
    pub fn retry(&self) -> Option<String> {
        if self.locked {
            self.pending.front().cloned()
        } else {
            None
        }
    }

    /// Drop everything and invalidate outstanding completions and timers
    pub fn clear(&mut self) {
        self.pending.clear();
        self.locked = false;
        self.generation += 1;
    }

    pub fn in_flight(&self) -> Option<&str> {
        if self.locked {
            self.pending.front().map(String::as_str)
        } else {
            None
        }
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.get(1).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
