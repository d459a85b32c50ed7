use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Fee category name -> amount. Categories are whatever fee types the school
/// has configured; nothing here enumerates them.
pub type FeeBreakdown = BTreeMap<String, Decimal>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeLineItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub subject_name: String,
    pub fee_breakdown: FeeBreakdown,
    pub total_amount: Decimal,
}

impl FeeLineItem {
    /// Builds a line item whose total is derived from its breakdown.
    pub fn derived(
        id: impl Into<String>,
        student_id: Option<String>,
        subject_name: impl Into<String>,
        fee_breakdown: FeeBreakdown,
    ) -> Self {
        let total_amount = recompute_line_item_total(&fee_breakdown);
        Self {
            id: id.into(),
            student_id,
            subject_name: subject_name.into(),
            fee_breakdown,
            total_amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FeeWarning {
    #[serde(rename_all = "camelCase")]
    NegativeAmount {
        line_item_id: String,
        category: String,
        amount: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    DiscountOutOfRange { discount_percentage: Decimal },
    /// A computed figure left the `Decimal` range and was pinned to its limit.
    #[serde(rename_all = "camelCase")]
    AmountOverflow {
        #[serde(skip_serializing_if = "Option::is_none")]
        line_item_id: Option<String>,
        field: OverflowField,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowField {
    TotalAmount,
    Subtotal,
    DiscountAmount,
    Total,
}

/// Coerces a raw form value into an amount. Anything that is not a number or
/// a numeric string counts as zero: a cleared input box is not an error.
pub fn parse_amount(raw: Option<&serde_json::Value>) -> Decimal {
    let Some(raw) = raw else {
        return Decimal::ZERO;
    };
    match raw {
        serde_json::Value::Number(n) => parse_decimal_str(&n.to_string()),
        serde_json::Value::String(s) => parse_decimal_str(s),
        _ => Decimal::ZERO,
    }
}

fn parse_decimal_str(s: &str) -> Decimal {
    let t = s.trim();
    if t.is_empty() {
        return Decimal::ZERO;
    }
    Decimal::from_str(t)
        .or_else(|_| Decimal::from_scientific(t))
        .unwrap_or(Decimal::ZERO)
}

/// Coerces a JSON object of `{category: amount}` into a breakdown.
/// Non-object input yields an empty breakdown.
pub fn parse_breakdown(raw: Option<&serde_json::Value>) -> FeeBreakdown {
    let Some(obj) = raw.and_then(|v| v.as_object()) else {
        return FeeBreakdown::new();
    };
    obj.iter()
        .map(|(k, v)| (k.clone(), parse_amount(Some(v))))
        .collect()
}

fn limit(negative: bool) -> Decimal {
    if negative {
        Decimal::MIN
    } else {
        Decimal::MAX
    }
}

/// Sum that pins to `Decimal::MAX`/`MIN` instead of panicking. The flag is set
/// when any step overflowed.
fn pinned_sum(values: impl IntoIterator<Item = Decimal>) -> (Decimal, bool) {
    let mut acc = Decimal::ZERO;
    let mut overflowed = false;
    for v in values {
        acc = acc.checked_add(v).unwrap_or_else(|| {
            overflowed = true;
            limit(v.is_sign_negative())
        });
    }
    (acc, overflowed)
}

fn discount_of(subtotal: Decimal, discount_percentage: Decimal) -> Option<Decimal> {
    subtotal
        .checked_mul(discount_percentage)
        .and_then(|d| d.checked_div(HUNDRED))
        // The product can overflow even when the discount itself fits.
        .or_else(|| {
            discount_percentage
                .checked_div(HUNDRED)
                .and_then(|p| subtotal.checked_mul(p))
        })
}

fn compute_totals(
    line_items: &[FeeLineItem],
    discount_percentage: Decimal,
) -> (InvoiceTotals, Vec<OverflowField>) {
    let mut overflow = Vec::new();
    let (subtotal, over) = pinned_sum(line_items.iter().map(|li| li.total_amount));
    if over {
        overflow.push(OverflowField::Subtotal);
    }
    let discount_amount = discount_of(subtotal, discount_percentage).unwrap_or_else(|| {
        overflow.push(OverflowField::DiscountAmount);
        limit(subtotal.is_sign_negative() != discount_percentage.is_sign_negative())
    });
    let total = subtotal.checked_sub(discount_amount).unwrap_or_else(|| {
        overflow.push(OverflowField::Total);
        limit(subtotal.is_sign_negative())
    });
    let totals = InvoiceTotals {
        subtotal: subtotal.normalize(),
        discount_percentage: discount_percentage.normalize(),
        discount_amount: discount_amount.normalize(),
        total: total.normalize(),
    };
    (totals, overflow)
}

pub fn recompute_line_item_total(breakdown: &FeeBreakdown) -> Decimal {
    pinned_sum(breakdown.values().copied()).0
}

/// Never fails: a figure outside the `Decimal` range is pinned to the limit
/// and reported by [`fee_warnings`].
pub fn recompute_invoice_totals(
    line_items: &[FeeLineItem],
    discount_percentage: Decimal,
) -> InvoiceTotals {
    compute_totals(line_items, discount_percentage).0
}

/// Flags for the presentation layer. The arithmetic above accepts all of
/// these inputs.
pub fn fee_warnings(line_items: &[FeeLineItem], discount_percentage: Decimal) -> Vec<FeeWarning> {
    let mut out = Vec::new();
    for li in line_items {
        for (category, amount) in &li.fee_breakdown {
            if amount.is_sign_negative() && !amount.is_zero() {
                out.push(FeeWarning::NegativeAmount {
                    line_item_id: li.id.clone(),
                    category: category.clone(),
                    amount: *amount,
                });
            }
        }
        if pinned_sum(li.fee_breakdown.values().copied()).1 {
            out.push(FeeWarning::AmountOverflow {
                line_item_id: Some(li.id.clone()),
                field: OverflowField::TotalAmount,
            });
        }
    }
    for field in compute_totals(line_items, discount_percentage).1 {
        out.push(FeeWarning::AmountOverflow {
            line_item_id: None,
            field,
        });
    }
    if !discount_in_range(discount_percentage) {
        out.push(FeeWarning::DiscountOutOfRange {
            discount_percentage,
        });
    }
    out
}

/// True when any line or invoice figure had to be pinned.
pub fn has_overflow(warnings: &[FeeWarning]) -> bool {
    warnings
        .iter()
        .any(|w| matches!(w, FeeWarning::AmountOverflow { .. }))
}

pub fn discount_in_range(discount_percentage: Decimal) -> bool {
    discount_percentage >= Decimal::ZERO && discount_percentage <= HUNDRED
}

pub fn warnings_json(warnings: &[FeeWarning]) -> serde_json::Value {
    serde_json::to_value(warnings).unwrap_or_else(|_| json!([]))
}
