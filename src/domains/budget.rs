// Personal budget tracker: categories, income, expenses, monthly budgets, saving goals

use crate::document::{Document, OnDelete, Relation};
use crate::error::{Result, ValidationError};
use crate::record::{Amount, new_id};
use crate::store::{Removal, Store};
use crate::views::{self, GroupTotals, Period, Progress, ProgressScale, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

pub const STORAGE_KEY: &str = "pbt_v1";

const DEFAULT_COLOR: &str = "#0d6efd";
/// Color for categories that no longer exist
pub const UNKNOWN_COLOR: &str = "#6c757d";

/// The profile every record belongs to; the document's anchor
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default, alias = "user_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Income,
    #[default]
    Expense,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Income => "income",
            CategoryKind::Expense => "expense",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default, alias = "category_id")]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: CategoryKind,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Income {
    #[serde(default, alias = "income_id")]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub amount: Amount,
    #[serde(default)]
    pub income_date: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    #[serde(default, alias = "expense_id")]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub amount: Amount,
    #[serde(default)]
    pub expense_date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payment_method: String,
}

impl Expense {
    pub fn new(category_id: &str, amount: f64, expense_date: &str) -> Self {
        Self {
            id: String::new(),
            created_at: DateTime::default(),
            user_id: String::new(),
            category_id: category_id.to_string(),
            amount: Amount::new(amount),
            expense_date: expense_date.to_string(),
            description: String::new(),
            payment_method: String::new(),
        }
    }
}

/// Spending limit for one category in one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default, alias = "budget_id")]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: String,
    pub category_id: String,
    pub year: i32,
    pub month: u32,
    #[serde(default)]
    pub limit_amount: Amount,
}

impl Budget {
    pub fn period(&self) -> Option<Period> {
        Period::new(self.year, self.month).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingGoal {
    #[serde(default, alias = "goal_id")]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub target_amount: Amount,
    #[serde(default)]
    pub current_amount: Amount,
    #[serde(default)]
    pub target_date: String,
    #[serde(default)]
    pub status: GoalStatus,
}

impl SavingGoal {
    pub fn new(name: &str, target_amount: f64, current_amount: f64) -> Self {
        Self {
            id: String::new(),
            created_at: DateTime::default(),
            user_id: String::new(),
            name: name.to_string(),
            target_amount: Amount::new(target_amount),
            current_amount: Amount::new(current_amount),
            target_date: String::new(),
            status: GoalStatus::Active,
        }
    }
}

crate::impl_record!(Category, "categories");
crate::impl_record!(Income, "income");
crate::impl_record!(Expense, "expenses");
crate::impl_record!(Budget, "budgets");
crate::impl_record!(SavingGoal, "savingGoals");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BudgetDocument {
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub income: Vec<Income>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(default)]
    pub budgets: Vec<Budget>,
    #[serde(rename = "savingGoals", default)]
    pub saving_goals: Vec<SavingGoal>,
}

crate::impl_holds!(BudgetDocument {
    Category => categories,
    Income => income,
    Expense => expenses,
    Budget => budgets,
    SavingGoal => saving_goals,
});

impl Document for BudgetDocument {
    fn storage_key() -> &'static str {
        STORAGE_KEY
    }

    fn collections() -> &'static [&'static str] {
        &["categories", "income", "expenses", "budgets", "savingGoals"]
    }

    fn seed() -> Self {
        let now = Utc::now();
        let today = super::today_iso();
        let period = Period::current();
        let user_id = new_id();

        let category = |name: &str, kind: CategoryKind, color: &str| Category {
            id: new_id(),
            created_at: now,
            user_id: user_id.clone(),
            name: name.to_string(),
            kind,
            color: color.to_string(),
        };
        let salary = category("Salary", CategoryKind::Income, "#0d6efd");
        let food = category("Food", CategoryKind::Expense, "#dc3545");
        let transport = category("Transport", CategoryKind::Expense, "#198754");
        let bills = category("Bills", CategoryKind::Expense, "#6f42c1");

        let budget = |category_id: &str, limit: f64| Budget {
            id: new_id(),
            created_at: now,
            user_id: user_id.clone(),
            category_id: category_id.to_string(),
            year: period.year(),
            month: period.month(),
            limit_amount: Amount::new(limit),
        };

        BudgetDocument {
            income: vec![Income {
                id: new_id(),
                created_at: now,
                user_id: user_id.clone(),
                source: "Monthly Salary".to_string(),
                amount: Amount::new(60000.0),
                income_date: today.clone(),
                description: "Seed income".to_string(),
            }],
            expenses: vec![Expense {
                id: new_id(),
                created_at: now,
                user_id: user_id.clone(),
                category_id: food.id.clone(),
                amount: Amount::new(250.0),
                expense_date: today,
                description: "Breakfast".to_string(),
                payment_method: "UPI".to_string(),
            }],
            budgets: vec![budget(&food.id, 6000.0), budget(&transport.id, 3000.0)],
            saving_goals: vec![SavingGoal {
                id: new_id(),
                created_at: now,
                user_id: user_id.clone(),
                name: "Emergency Fund".to_string(),
                target_amount: Amount::new(100000.0),
                current_amount: Amount::new(10000.0),
                target_date: format!("{}-12-31", period.year()),
                status: GoalStatus::Active,
            }],
            categories: vec![salary, food, transport, bills],
            user: User {
                id: user_id,
                name: "Me".to_string(),
                email: "me@example.com".to_string(),
                created_at: now,
                updated_at: now,
            },
        }
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.user.id.trim().is_empty() {
            return Err(ValidationError::MissingAnchor("user.id".to_string()));
        }
        Ok(())
    }

    fn relations() -> Vec<Relation<Self>> {
        vec![
            // budgets go with their category; spending history stays and shows "Unknown"
            Relation::new::<Category, Budget>(OnDelete::Cascade, |b| b.category_id.as_str()),
            Relation::new::<Category, Expense>(OnDelete::Keep, |e| e.category_id.as_str()),
        ]
    }
}

pub type BudgetStore = Store<BudgetDocument>;

fn positive(field: &str, value: f64) -> std::result::Result<Amount, ValidationError> {
    let amount = Amount::new(value);
    if amount.value() <= 0.0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            expected: "greater than zero".to_string(),
        });
    }
    Ok(amount)
}

// ============================================================================
// Mutations
// ============================================================================

pub fn add_category(store: &mut BudgetStore, name: &str, kind: CategoryKind, color: Option<&str>) -> Result<Category> {
    let name = super::required("category name", name)?;
    let category = Category {
        id: String::new(),
        created_at: DateTime::default(),
        user_id: store.document().user.id.clone(),
        name,
        kind,
        color: color.filter(|c| !c.trim().is_empty()).unwrap_or(DEFAULT_COLOR).to_string(),
    };
    store.insert(category)
}

/// Rename or recolor a category, keeping its ID and creation time
pub fn edit_category(
    store: &mut BudgetStore,
    id: &str,
    name: &str,
    kind: CategoryKind,
    color: &str,
) -> Result<Option<Category>> {
    let name = super::required("category name", name)?;
    store.update_with::<Category>(id, |c| {
        c.name = name;
        c.kind = kind;
        if !color.trim().is_empty() {
            c.color = color.to_string();
        }
    })
}

/// Delete a category. Its budgets are removed with it; expenses keep the
/// dangling reference and display as "Unknown".
pub fn delete_category(store: &mut BudgetStore, id: &str) -> Result<Option<Removal<Category>>> {
    store.remove::<Category>(id, None)
}

pub fn add_income(store: &mut BudgetStore, source: &str, amount: f64, date: &str, description: &str) -> Result<Income> {
    let source = super::required("income source", source)?;
    let amount = positive("amount", amount)?;
    let income = Income {
        id: String::new(),
        created_at: DateTime::default(),
        user_id: store.document().user.id.clone(),
        source,
        amount,
        income_date: if date.is_empty() { super::today_iso() } else { date.to_string() },
        description: description.trim().to_string(),
    };
    store.insert(income)
}

pub fn add_expense(store: &mut BudgetStore, mut expense: Expense) -> Result<Expense> {
    if expense.category_id.trim().is_empty() {
        return Err(ValidationError::Required("category".to_string()).into());
    }
    expense.amount = positive("amount", expense.amount.value())?;
    if expense.expense_date.is_empty() {
        expense.expense_date = super::today_iso();
    }
    expense.user_id = store.document().user.id.clone();
    store.insert(expense)
}

/// Set the limit for a category in a month: updates the existing budget for
/// that category and month, or creates one
pub fn set_budget(store: &mut BudgetStore, category_id: &str, period: Period, limit: f64) -> Result<Budget> {
    if category_id.trim().is_empty() {
        return Err(ValidationError::Required("category".to_string()).into());
    }
    let limit = positive("limit_amount", limit)?;
    let user_id = store.document().user.id.clone();

    let existing = store
        .find::<Budget>(|b| {
            b.user_id == user_id && b.category_id == category_id && b.year == period.year() && b.month == period.month()
        })
        .map(|b| b.id.clone());

    if let Some(id) = existing
        && let Some(updated) = store.update_with::<Budget>(&id, |b| b.limit_amount = limit)?
    {
        debug!(id = %updated.id, period = %period, "Budget limit updated");
        return Ok(updated);
    }

    store.insert(Budget {
        id: String::new(),
        created_at: DateTime::default(),
        user_id,
        category_id: category_id.to_string(),
        year: period.year(),
        month: period.month(),
        limit_amount: limit,
    })
}

/// Create or replace a saving goal. The current amount never exceeds the target.
pub fn save_goal(store: &mut BudgetStore, mut goal: SavingGoal) -> Result<SavingGoal> {
    goal.name = super::required("goal name", &goal.name)?;
    goal.target_amount = positive("target_amount", goal.target_amount.value())?;
    let current = goal.current_amount.value().clamp(0.0, goal.target_amount.value());
    goal.current_amount = Amount::new(current);
    goal.user_id = store.document().user.id.clone();
    store.upsert(goal)
}

// ============================================================================
// Views
// ============================================================================

/// Categories of one kind, ordered by name
pub fn categories_of(doc: &BudgetDocument, kind: CategoryKind) -> Vec<&Category> {
    let mut categories: Vec<&Category> = doc.categories.iter().filter(|c| c.kind == kind).collect();
    categories.sort_by(|a, b| by_name(&a.name, &b.name));
    categories
}

/// Every category, expense kinds before income, then by name
pub fn categories_sorted(doc: &BudgetDocument) -> Vec<&Category> {
    let mut categories: Vec<&Category> = doc.categories.iter().collect();
    categories.sort_by(|a, b| {
        a.kind
            .as_str()
            .cmp(b.kind.as_str())
            .then_with(|| by_name(&a.name, &b.name))
    });
    categories
}

fn by_name(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

/// Name of a category, or "Unknown" when it was deleted
pub fn category_name<'a>(doc: &'a BudgetDocument, id: &str) -> &'a str {
    views::label(&doc.categories, id, |c| c.name.as_str())
}

/// The user's income in a month, newest date first
pub fn income_in<'a>(doc: &'a BudgetDocument, period: &Period) -> Vec<&'a Income> {
    let mut income: Vec<&Income> = views::in_period(&doc.income, period, |i| i.income_date.as_str())
        .into_iter()
        .filter(|i| i.user_id == doc.user.id)
        .collect();
    income.sort_by(|a, b| b.income_date.cmp(&a.income_date));
    income
}

/// The user's expenses in a month, newest date first
pub fn expenses_in<'a>(doc: &'a BudgetDocument, period: &Period) -> Vec<&'a Expense> {
    let mut expenses: Vec<&Expense> = views::in_period(&doc.expenses, period, |e| e.expense_date.as_str())
        .into_iter()
        .filter(|e| e.user_id == doc.user.id)
        .collect();
    expenses.sort_by(|a, b| b.expense_date.cmp(&a.expense_date));
    expenses
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonthSummary {
    pub income: f64,
    pub expense: f64,
    pub net: f64,
}

pub fn month_summary(doc: &BudgetDocument, period: &Period) -> MonthSummary {
    let income = views::sum(income_in(doc, period), |i| i.amount.value());
    let expense = views::sum(expenses_in(doc, period), |e| e.amount.value());
    MonthSummary {
        income,
        expense,
        net: income - expense,
    }
}

/// Month spending per category ID
pub fn expenses_by_category(doc: &BudgetDocument, period: &Period) -> GroupTotals {
    views::group_sum(expenses_in(doc, period), |e| e.category_id.as_str(), |e| e.amount.value())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownRow {
    pub category_id: String,
    pub name: String,
    pub color: String,
    pub amount: f64,
    pub share_pct: f64,
}

/// Largest spending categories of the month, with their share of all spending
pub fn spending_breakdown(doc: &BudgetDocument, period: &Period, top_n: usize) -> Vec<BreakdownRow> {
    let totals = expenses_by_category(doc, period);
    let total = totals.total();

    totals
        .top(top_n)
        .into_iter()
        .map(|(category_id, amount)| {
            let category = views::resolve(&doc.categories, category_id);
            BreakdownRow {
                category_id: category_id.to_string(),
                name: category.map_or(views::UNKNOWN, |c| c.name.as_str()).to_string(),
                color: category.map_or(UNKNOWN_COLOR, |c| c.color.as_str()).to_string(),
                amount,
                share_pct: views::share_pct(amount, total),
            }
        })
        .collect()
}

pub fn budgets_for<'a>(doc: &'a BudgetDocument, period: &Period) -> Vec<&'a Budget> {
    doc.budgets
        .iter()
        .filter(|b| b.user_id == doc.user.id && b.year == period.year() && b.month == period.month())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub budget_id: String,
    pub category_id: String,
    pub name: String,
    pub limit: f64,
    pub spent: f64,
    pub remaining: f64,
    pub progress: Progress,
}

/// Spending against each of the month's budgets
pub fn budget_status(doc: &BudgetDocument, period: &Period, scale: &ProgressScale) -> Vec<BudgetStatus> {
    let spent_by_category = expenses_by_category(doc, period);

    budgets_for(doc, period)
        .into_iter()
        .map(|b| {
            let limit = b.limit_amount.value();
            let spent = spent_by_category.get(&b.category_id).unwrap_or(0.0);
            BudgetStatus {
                budget_id: b.id.clone(),
                category_id: b.category_id.clone(),
                name: category_name(doc, &b.category_id).to_string(),
                limit,
                spent,
                remaining: limit - spent,
                progress: scale.measure(spent, limit),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgress {
    pub goal_id: String,
    pub name: String,
    pub progress: Progress,
    pub completed: bool,
}

impl GoalProgress {
    /// Completed goals count as reached regardless of amounts
    pub fn reached(&self) -> bool {
        self.completed || self.progress.tier == Tier::Over
    }
}

pub fn goal_progress(doc: &BudgetDocument, scale: &ProgressScale) -> Vec<GoalProgress> {
    doc.saving_goals
        .iter()
        .map(|g| GoalProgress {
            goal_id: g.id.clone(),
            name: g.name.clone(),
            progress: scale.measure(g.current_amount.value(), g.target_amount.value()),
            completed: g.status == GoalStatus::Completed,
        })
        .collect()
}
