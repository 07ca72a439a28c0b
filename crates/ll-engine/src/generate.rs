use ll_sampler::{Sampler, TokenId};

use crate::backend::Session;
use crate::error::{BridgeError, Result};

/// Why the decode loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `max_tokens` tokens were produced.
    MaxTokens,
    /// The sampler chose the end-of-sequence token.
    EndOfSequence,
    /// An evaluation call failed; earlier tokens are kept.
    DecodeFailed,
    /// The position counter reached the context length.
    ContextFull,
}

/// Output of one decode loop. `tokens` never contains the EOS token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub tokens: Vec<TokenId>,
    pub stop: StopReason,
}

/// Prime `session` with `prompt` and extend it one token at a time.
///
/// The prompt is evaluated in a single batch from position 0. Generation
/// then re-submits the most recent token at the current position, picks the
/// next one with `sampler`, and stops after `max_tokens` tokens, on EOS, on a
/// failed evaluation or when the context is full. Only a failure to prime is
/// an error.
pub fn generate<S, P>(
    session: &mut S,
    sampler: &P,
    prompt: &[TokenId],
    max_tokens: usize,
) -> Result<Generation>
where
    S: Session + ?Sized,
    P: Sampler + ?Sized,
{
    let &last = prompt
        .last()
        .ok_or_else(|| BridgeError::Tokenize("prompt produced no tokens".to_string()))?;
    let n_ctx = session.n_ctx();
    if prompt.len() > n_ctx {
        return Err(BridgeError::ContextOverflow {
            tokens: prompt.len(),
            n_ctx,
        });
    }

    session.decode(prompt, 0)?;

    let eos = session.eos();
    let mut tokens = Vec::with_capacity(max_tokens.min(n_ctx));
    let mut current = last;
    let mut pos = prompt.len();

    let stop = loop {
        if tokens.len() >= max_tokens {
            break StopReason::MaxTokens;
        }
        if pos >= n_ctx {
            break StopReason::ContextFull;
        }

        let logits = match session.decode(&[current], pos) {
            Ok(logits) => logits,
            Err(e) => {
                log::debug!("decode at position {pos} failed, stopping early: {e}");
                break StopReason::DecodeFailed;
            }
        };
        let Some(next) = sampler.select(logits) else {
            break StopReason::DecodeFailed;
        };
        if next == eos {
            break StopReason::EndOfSequence;
        }

        tokens.push(next);
        pos += 1;
        current = next;
    };

    Ok(Generation { tokens, stop })
}

/// Concatenate the text of `tokens` in order.
///
/// Pieces are joined as bytes before UTF-8 decoding so characters split
/// across tokens come out whole; invalid sequences become U+FFFD.
pub fn detokenize<S: Session + ?Sized>(session: &S, tokens: &[TokenId]) -> Result<String> {
    let mut bytes = Vec::with_capacity(tokens.len() * 4);
    for &token in tokens {
        bytes.extend_from_slice(&session.token_to_piece(token)?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Outcome of asking a backend to write one token's text into a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PieceRead {
    /// The text fit.
    Done(Vec<u8>),
    /// The buffer was too small; the backend needs this many bytes.
    TooSmall(usize),
}

/// Fetch the text of `token` with `read`, starting from an `initial`-byte
/// buffer and growing it to whatever size the backend asks for.
///
/// A request that does not exceed the current size is treated as a failure.
pub fn read_piece<F>(token: TokenId, initial: usize, mut read: F) -> Result<Vec<u8>>
where
    F: FnMut(usize) -> Result<PieceRead>,
{
    let mut size = initial.max(1);
    loop {
        match read(size)? {
            PieceRead::Done(bytes) => return Ok(bytes),
            PieceRead::TooSmall(needed) if needed > size => size = needed,
            PieceRead::TooSmall(needed) => {
                return Err(BridgeError::Detokenize {
                    token,
                    reason: format!("backend asked for {needed} bytes, buffer already {size}"),
                })
            }
        }
    }
}
