//! Well-known value and property names.

/// Value names used by the built-in scenarios and tests.
pub struct ValueRequirementNames;

impl ValueRequirementNames {
    /// Present value of a position, trade or aggregate.
    pub const PRESENT_VALUE: &'static str = "PresentValue";
    /// Sensitivity to a one basis point parallel shift.
    pub const PV01: &'static str = "PV01";
    /// Market value of a security.
    pub const MARKET_VALUE: &'static str = "MarketValue";
    /// Last traded price of a security (usually market data).
    pub const MARKET_PRICE: &'static str = "MarketPrice";
    /// A built yield curve.
    pub const YIELD_CURVE: &'static str = "YieldCurve";
    /// Market quotes a yield curve is built from.
    pub const YIELD_CURVE_MARKET_DATA: &'static str = "YieldCurveMarketData";
}

/// Property names with a fixed meaning.
pub struct ValuePropertyNames;

impl ValuePropertyNames {
    /// Identifier of the function producing a value. Present on every specification.
    pub const FUNCTION: &'static str = "Function";
    /// Currency of a monetary value.
    pub const CURRENCY: &'static str = "Currency";
    /// Name of the curve a value was computed from.
    pub const CURVE: &'static str = "Curve";
}
