use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuoteConfidence {
    Exact,
    /// Local estimate produced after the quoter failed. Not safe to submit.
    Approximate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiquidityQuote {
    pub liquidity_amount: u128,
    pub token_max_a: u64,
    pub token_max_b: u64,
    pub confidence: QuoteConfidence,
}

impl LiquidityQuote {
    pub fn is_exact(&self) -> bool {
        self.confidence == QuoteConfidence::Exact
    }
}
