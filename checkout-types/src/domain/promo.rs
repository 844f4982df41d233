//! Promo codes: eligibility rules, usage limits and discount computation.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::clock::{wib_day_bounds, weekday_wib};
use super::order::OrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Mon,
            Weekday::Tue => DayOfWeek::Tue,
            Weekday::Wed => DayOfWeek::Wed,
            Weekday::Thu => DayOfWeek::Thu,
            Weekday::Fri => DayOfWeek::Fri,
            Weekday::Sat => DayOfWeek::Sat,
            Weekday::Sun => DayOfWeek::Sun,
        }
    }
}

/// Why a promo code was refused. `code()` is the machine-readable reason
/// returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromoRejection {
    PromoNotFound,
    PromoNotActive,
    PromoNotStarted,
    PromoExpired,
    ProductNotApplicable,
    PaymentNotApplicable,
    RegionNotApplicable,
    DayNotApplicable,
    MinAmountNotMet,
    UsageLimitExceeded,
    DailyUsageLimitExceeded,
    UserUsageLimitExceeded,
    DeviceUsageLimitExceeded,
    IpUsageLimitExceeded,
}

impl PromoRejection {
    pub fn code(&self) -> &'static str {
        use PromoRejection::*;
        match self {
            PromoNotFound => "PROMO_NOT_FOUND",
            PromoNotActive => "PROMO_NOT_ACTIVE",
            PromoNotStarted => "PROMO_NOT_STARTED",
            PromoExpired => "PROMO_EXPIRED",
            ProductNotApplicable => "PRODUCT_NOT_APPLICABLE",
            PaymentNotApplicable => "PAYMENT_NOT_APPLICABLE",
            RegionNotApplicable => "REGION_NOT_APPLICABLE",
            DayNotApplicable => "DAY_NOT_APPLICABLE",
            MinAmountNotMet => "MIN_AMOUNT_NOT_MET",
            UsageLimitExceeded => "USAGE_LIMIT_EXCEEDED",
            DailyUsageLimitExceeded => "DAILY_USAGE_LIMIT_EXCEEDED",
            UserUsageLimitExceeded => "USER_USAGE_LIMIT_EXCEEDED",
            DeviceUsageLimitExceeded => "DEVICE_USAGE_LIMIT_EXCEEDED",
            IpUsageLimitExceeded => "IP_USAGE_LIMIT_EXCEEDED",
        }
    }
}

impl std::fmt::Display for PromoRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use PromoRejection::*;
        let msg = match self {
            PromoNotFound => "promo code not found",
            PromoNotActive => "promo code is not active",
            PromoNotStarted => "promo has not started yet",
            PromoExpired => "promo has expired",
            ProductNotApplicable => "promo does not apply to this product",
            PaymentNotApplicable => "promo does not apply to this payment channel",
            RegionNotApplicable => "promo does not apply to this region",
            DayNotApplicable => "promo is not available today",
            MinAmountNotMet => "order does not meet the promo minimum amount",
            UsageLimitExceeded => "promo usage limit reached",
            DailyUsageLimitExceeded => "promo daily usage limit reached",
            UserUsageLimitExceeded => "promo already used the maximum times by this user",
            DeviceUsageLimitExceeded => "promo already used the maximum times on this device",
            IpUsageLimitExceeded => "promo already used the maximum times from this network",
        };
        f.write_str(msg)
    }
}

/// Usage limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageLimits {
    pub max_usage: i64,
    pub max_daily_usage: i64,
    pub max_usage_per_user: i64,
    pub max_usage_per_device: i64,
    pub max_usage_per_ip: i64,
}

/// Running usage counts for one promo along the five limit dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub total: i64,
    pub daily: i64,
    pub per_user: i64,
    pub per_device: i64,
    pub per_ip: i64,
}

impl UsageLimits {
    /// Checks counts in order: total, daily, per-user, per-device, per-ip.
    pub fn check(&self, counts: &UsageCounts) -> Result<(), PromoRejection> {
        let reached = |limit: i64, count: i64| limit > 0 && count >= limit;
        if reached(self.max_usage, counts.total) {
            return Err(PromoRejection::UsageLimitExceeded);
        }
        if reached(self.max_daily_usage, counts.daily) {
            return Err(PromoRejection::DailyUsageLimitExceeded);
        }
        if reached(self.max_usage_per_user, counts.per_user) {
            return Err(PromoRejection::UserUsageLimitExceeded);
        }
        if reached(self.max_usage_per_device, counts.per_device) {
            return Err(PromoRejection::DeviceUsageLimitExceeded);
        }
        if reached(self.max_usage_per_ip, counts.per_ip) {
            return Err(PromoRejection::IpUsageLimitExceeded);
        }
        Ok(())
    }
}

/// A WIB calendar day as a half-open UTC range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn containing(at: DateTime<Utc>) -> Self {
        let (start, end) = wib_day_bounds(at);
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Identity of the redeemer, used to count usage along each dimension.
/// Absent identities count as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageQuery {
    pub promo_id: Uuid,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
    pub day: DayWindow,
}

/// Redemption record, staged with its order.
///
/// Only redeemed rows count toward the limits. A row is redeemed by its
/// order's first paid transition; orders that never pay leave it staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoUsage {
    pub id: Uuid,
    pub promo_id: Uuid,
    pub order_id: OrderId,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
    pub discount: i64,
    pub created_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl PromoUsage {
    pub fn is_redeemed(&self) -> bool {
        self.redeemed_at.is_some()
    }
}

impl UsageCounts {
    /// Counts the redeemed rows of `query.promo_id` along each dimension.
    /// The daily window applies to the redemption time.
    pub fn tally<'a>(query: &UsageQuery, usages: impl IntoIterator<Item = &'a PromoUsage>) -> Self {
        let same = |field: &Option<String>, wanted: &Option<String>| {
            matches!((field, wanted), (Some(a), Some(b)) if a == b)
        };
        let mut counts = Self::default();
        for usage in usages.into_iter().filter(|u| u.promo_id == query.promo_id) {
            let Some(redeemed_at) = usage.redeemed_at else {
                continue;
            };
            counts.total += 1;
            if query.day.contains(redeemed_at) {
                counts.daily += 1;
            }
            if same(&usage.user_id, &query.user_id) {
                counts.per_user += 1;
            }
            if same(&usage.device_id, &query.device_id) {
                counts.per_device += 1;
            }
            if same(&usage.ip_address, &query.ip_address) {
                counts.per_ip += 1;
            }
        }
        counts
    }
}

/// A usage row to stage with the order. The limits are rechecked inside the
/// same atomic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoReservation {
    pub usage: PromoUsage,
    pub limits: UsageLimits,
    pub query: UsageQuery,
}

/// What the promo is being applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoContext<'a> {
    pub product_code: &'a str,
    pub channel: &'a str,
    pub region: Option<&'a str>,
    pub subtotal: i64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Promo {
    pub id: Uuid,
    /// Matched case-insensitively; stored upper-case.
    pub code: String,
    pub title: String,
    pub active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Empty means every day.
    #[serde(default)]
    pub days_available: Vec<DayOfWeek>,
    /// Product codes. Empty means all products.
    #[serde(default)]
    pub products: Vec<String>,
    /// Channel codes. Empty means all channels.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Region codes. Empty means all regions.
    #[serde(default)]
    pub regions: Vec<String>,
    pub min_amount: i64,
    pub flat: i64,
    pub percent_bps: i64,
    /// Zero means uncapped.
    pub max_discount: i64,
    pub limits: UsageLimits,
}

/// An empty allow-list admits everything; otherwise the value must be present
/// and match one entry, ignoring ASCII case.
fn allows(list: &[String], value: Option<&str>) -> bool {
    list.is_empty()
        || value.is_some_and(|v| list.iter().any(|allowed| allowed.eq_ignore_ascii_case(v.trim())))
}

impl Promo {
    pub fn new(code: &str, title: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_ascii_uppercase(),
            title: title.to_string(),
            active: true,
            starts_at: None,
            expires_at: None,
            days_available: Vec::new(),
            products: Vec::new(),
            channels: Vec::new(),
            regions: Vec::new(),
            min_amount: 0,
            flat: 0,
            percent_bps: 0,
            max_discount: 0,
            limits: UsageLimits::default(),
        }
    }

    /// Eligibility checks that do not depend on usage counts, in order:
    /// active, started, expired, product, channel, region, day, min amount.
    pub fn check_eligibility(&self, ctx: &PromoContext<'_>) -> Result<(), PromoRejection> {
        if !self.active {
            return Err(PromoRejection::PromoNotActive);
        }
        if self.starts_at.is_some_and(|start| ctx.now < start) {
            return Err(PromoRejection::PromoNotStarted);
        }
        if self.expires_at.is_some_and(|end| ctx.now >= end) {
            return Err(PromoRejection::PromoExpired);
        }
        if !allows(&self.products, Some(ctx.product_code)) {
            return Err(PromoRejection::ProductNotApplicable);
        }
        if !allows(&self.channels, Some(ctx.channel)) {
            return Err(PromoRejection::PaymentNotApplicable);
        }
        if !allows(&self.regions, ctx.region) {
            return Err(PromoRejection::RegionNotApplicable);
        }
        if !self.days_available.is_empty() {
            let today = DayOfWeek::from(weekday_wib(ctx.now));
            if !self.days_available.contains(&today) {
                return Err(PromoRejection::DayNotApplicable);
            }
        }
        if self.min_amount > 0 && ctx.subtotal < self.min_amount {
            return Err(PromoRejection::MinAmountNotMet);
        }
        Ok(())
    }

    /// Full validation; returns the discount to grant.
    pub fn validate(&self, ctx: &PromoContext<'_>, counts: &UsageCounts) -> Result<i64, PromoRejection> {
        self.check_eligibility(ctx)?;
        self.limits.check(counts)?;
        Ok(self.discount_for(ctx.subtotal))
    }

    /// Flat amount when set, otherwise a percentage; capped by `max_discount`
    /// and never above the subtotal.
    pub fn discount_for(&self, subtotal: i64) -> i64 {
        let raw = if self.flat > 0 {
            self.flat
        } else {
            subtotal.saturating_mul(self.percent_bps) / 10_000
        };
        let capped = if self.max_discount > 0 {
            raw.min(self.max_discount)
        } else {
            raw
        };
        capped.clamp(0, subtotal.max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ctx(subtotal: i64) -> PromoContext<'static> {
        PromoContext {
            product_code: "MLBB",
            channel: "VA_BRI",
            region: Some("ID"),
            subtotal,
            // Wednesday 10:00 WIB
            now: Utc.with_ymd_and_hms(2025, 3, 5, 3, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_flat_discount_within_cap() {
        let mut promo = Promo::new("hemat10", "Hemat");
        promo.flat = 10_000;
        promo.max_discount = 15_000;
        assert_eq!(promo.code, "HEMAT10");
        assert_eq!(promo.validate(&ctx(100_000), &UsageCounts::default()), Ok(10_000));
    }

    #[test]
    fn test_percentage_discount_clamps_to_cap() {
        let mut promo = Promo::new("TENPCT", "Ten");
        promo.percent_bps = 1_000;
        promo.max_discount = 4_000;
        assert_eq!(promo.discount_for(50_000), 4_000);
    }

    #[test]
    fn test_discount_never_exceeds_subtotal() {
        let mut promo = Promo::new("BIG", "Big");
        promo.flat = 20_000;
        assert_eq!(promo.discount_for(15_000), 15_000);
    }

    #[test]
    fn test_validation_order() {
        let mut promo = Promo::new("X", "X");
        promo.active = false;
        promo.products = vec!["OTHER".into()];
        assert_eq!(
            promo.check_eligibility(&ctx(100_000)),
            Err(PromoRejection::PromoNotActive)
        );
        promo.active = true;
        assert_eq!(
            promo.check_eligibility(&ctx(100_000)),
            Err(PromoRejection::ProductNotApplicable)
        );
    }

    #[test]
    fn test_window_and_day_rules() {
        let c = ctx(100_000);
        let mut promo = Promo::new("X", "X");
        promo.starts_at = Some(c.now + Duration::hours(1));
        assert_eq!(promo.check_eligibility(&c), Err(PromoRejection::PromoNotStarted));
        promo.starts_at = None;
        promo.expires_at = Some(c.now);
        assert_eq!(promo.check_eligibility(&c), Err(PromoRejection::PromoExpired));
        promo.expires_at = None;
        promo.days_available = vec![DayOfWeek::Sat, DayOfWeek::Sun];
        assert_eq!(promo.check_eligibility(&c), Err(PromoRejection::DayNotApplicable));
        promo.days_available.push(DayOfWeek::Wed);
        assert_eq!(promo.check_eligibility(&c), Ok(()));
    }

    #[test]
    fn test_region_and_min_amount() {
        let mut promo = Promo::new("X", "X");
        promo.regions = vec!["MY".into()];
        assert_eq!(
            promo.check_eligibility(&ctx(100_000)),
            Err(PromoRejection::RegionNotApplicable)
        );
        promo.regions = vec!["id".into()];
        promo.min_amount = 200_000;
        assert_eq!(
            promo.check_eligibility(&ctx(100_000)),
            Err(PromoRejection::MinAmountNotMet)
        );
    }

    #[test]
    fn test_allow_lists_ignore_case() {
        let mut promo = Promo::new("CASE", "Case");
        promo.products = vec!["mlbb".into()];
        promo.channels = vec!["va_bri".into()];
        promo.regions = vec!["id".into()];
        assert_eq!(promo.check_eligibility(&ctx(100_000)), Ok(()));

        promo.channels = vec!["QRIS".into()];
        assert_eq!(
            promo.check_eligibility(&ctx(100_000)),
            Err(PromoRejection::PaymentNotApplicable)
        );
    }

    #[test]
    fn test_tally_counts_redeemed_usage_only() {
        let promo_id = Uuid::new_v4();
        let now = ctx(0).now;
        let usage = |user: &str, redeemed_at: Option<DateTime<Utc>>| PromoUsage {
            id: Uuid::new_v4(),
            promo_id,
            order_id: OrderId::new(),
            user_id: Some(user.to_string()),
            device_id: None,
            ip_address: Some("10.0.0.1".to_string()),
            discount: 5_000,
            created_at: now - Duration::days(1),
            redeemed_at,
        };
        let usages = [
            usage("u-1", Some(now)),
            usage("u-1", None),
            usage("u-2", Some(now - Duration::days(2))),
        ];
        let query = UsageQuery {
            promo_id,
            user_id: Some("u-1".into()),
            device_id: None,
            ip_address: Some("10.0.0.1".into()),
            day: DayWindow::containing(now),
        };
        let counts = UsageCounts::tally(&query, &usages);
        assert_eq!(
            counts,
            UsageCounts {
                total: 2,
                daily: 1,
                per_user: 1,
                per_device: 0,
                per_ip: 2,
            }
        );
    }

    #[test]
    fn test_each_usage_dimension() {
        let limits = UsageLimits {
            max_usage: 100,
            max_daily_usage: 10,
            max_usage_per_user: 1,
            max_usage_per_device: 1,
            max_usage_per_ip: 3,
        };
        assert_eq!(limits.check(&UsageCounts::default()), Ok(()));
        let cases = [
            (UsageCounts { total: 100, ..Default::default() }, PromoRejection::UsageLimitExceeded),
            (UsageCounts { daily: 10, ..Default::default() }, PromoRejection::DailyUsageLimitExceeded),
            (UsageCounts { per_user: 1, ..Default::default() }, PromoRejection::UserUsageLimitExceeded),
            (UsageCounts { per_device: 1, ..Default::default() }, PromoRejection::DeviceUsageLimitExceeded),
            (UsageCounts { per_ip: 3, ..Default::default() }, PromoRejection::IpUsageLimitExceeded),
        ];
        for (counts, expected) in cases {
            assert_eq!(limits.check(&counts), Err(expected));
        }
    }

    #[test]
    fn test_zero_limits_are_unlimited() {
        let counts = UsageCounts {
            total: 1_000_000,
            daily: 1_000,
            per_user: 50,
            per_device: 50,
            per_ip: 50,
        };
        assert_eq!(UsageLimits::default().check(&counts), Ok(()));
    }
}
