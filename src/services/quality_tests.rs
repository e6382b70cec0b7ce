use crate::{
    db::{self, DbPool},
    entities::{
        barcode, batch,
        quality_test::{self, TestStatus},
        sku, test_answer, test_question, test_template, user,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

use super::{contains_ignore_case, non_blank, PageRequest};

/// Operator verdict on one template question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AnswerInput {
    pub question_id: i32,
    pub passed: bool,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RecordTestRequest {
    pub barcode_id: i32,
    pub template_id: i32,
    #[serde(default)]
    pub overall_status: TestStatus,
    #[serde(default)]
    pub answers: Vec<AnswerInput>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct TestFilter {
    /// Earliest test date, inclusive
    pub from_date: Option<NaiveDate>,
    /// Latest test date, inclusive
    pub to_date: Option<NaiveDate>,
    /// Exact SKU code
    pub sku: Option<String>,
    pub batch_id: Option<i32>,
    /// Case-insensitive substring of the barcode sequence number
    pub barcode: Option<String>,
    pub template_id: Option<i32>,
}

/// Status breakdown over a whole filtered set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TestCounts {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub pending: u64,
}

impl TestCounts {
    fn add(&mut self, status: TestStatus, n: u64) {
        self.total += n;
        match status {
            TestStatus::Passed => self.passed += n,
            TestStatus::Failed => self.failed += n,
            TestStatus::Pending => self.pending += n,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TestSummary {
    #[serde(flatten)]
    pub test: quality_test::Model,
    pub sku_code: String,
    pub sequence_number: String,
    pub operator: String,
    pub template_name: Option<String>,
}

/// One page of tests plus counts over every test matching the filter
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TestListing {
    pub items: Vec<TestSummary>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub counts: TestCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AnswerDetail {
    pub question_id: i32,
    pub question_text: String,
    pub is_passed: bool,
    pub remarks: String,
}

/// Read projection of one test used by the detail view and the PDF report
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TestDetail {
    pub test: quality_test::Model,
    pub sku: sku::Model,
    pub batch: batch::Model,
    pub barcode: barcode::Model,
    pub operator: String,
    pub template_name: Option<String>,
    pub answers: Vec<AnswerDetail>,
}

/// Service for recording and querying quality tests
#[derive(Clone)]
pub struct QualityTestService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl QualityTestService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Records a test with one answer per template question. SKU and batch
    /// come from the barcode. Questions left unanswered are stored as failed.
    #[instrument(skip(self, request), fields(barcode_id = request.barcode_id, template_id = request.template_id))]
    pub async fn record_test(
        &self,
        operator_id: i32,
        request: RecordTestRequest,
    ) -> Result<TestDetail, ServiceError> {
        let (test, failed_answers) = db::transaction(&self.db_pool, move |txn| {
            Box::pin(async move {
                let barcode = barcode::Entity::find_by_id(request.barcode_id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Barcode {} not found", request.barcode_id))
                    })?;
                test_template::Entity::find_by_id(request.template_id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "Test template {} not found",
                            request.template_id
                        ))
                    })?;
                user::Entity::find_by_id(operator_id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Unauthorized(format!("operator {} no longer exists", operator_id))
                    })?;

                let questions = test_question::Entity::find()
                    .filter(test_question::Column::TemplateId.eq(request.template_id))
                    .order_by_asc(test_question::Column::Id)
                    .all(txn)
                    .await?;
                let answers = match_answers(&questions, request.answers)?;

                let now = Utc::now();
                let test = quality_test::ActiveModel {
                    sku_id: Set(barcode.sku_id),
                    batch_id: Set(barcode.batch_id),
                    barcode_id: Set(barcode.id),
                    user_id: Set(operator_id),
                    template_id: Set(Some(request.template_id)),
                    overall_status: Set(request.overall_status),
                    test_date: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                let failed = answers.iter().filter(|a| !a.passed).count();
                if !answers.is_empty() {
                    let rows = answers.into_iter().map(|a| test_answer::ActiveModel {
                        test_id: Set(test.id),
                        question_id: Set(a.question_id),
                        is_passed: Set(a.passed),
                        remarks: Set(a.remarks),
                        ..Default::default()
                    });
                    test_answer::Entity::insert_many(rows).exec(txn).await?;
                }

                Ok::<_, ServiceError>((test, failed))
            })
        })
        .await?;

        counter!("batchtrace.tests.recorded", 1, "status" => test.overall_status.to_string());
        info!(
            test_id = test.id,
            status = %test.overall_status,
            failed_answers,
            "test recorded"
        );
        self.event_sender
            .send_or_log(Event::TestRecorded {
                test_id: test.id,
                barcode_id: test.barcode_id,
                status: test.overall_status,
                failed_answers,
            })
            .await;

        self.get_test_detail(test.id).await
    }

    /// Changes the overall status. Answers are never touched.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        test_id: i32,
        status: TestStatus,
    ) -> Result<quality_test::Model, ServiceError> {
        let existing = self.get_test(test_id).await?;
        let old_status = existing.overall_status;

        let mut active: quality_test::ActiveModel = existing.into();
        active.overall_status = Set(status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db_pool).await?;

        if old_status != status {
            info!(test_id, from = %old_status, to = %status, "test status updated");
            self.event_sender
                .send_or_log(Event::TestStatusChanged {
                    test_id,
                    old_status,
                    new_status: status,
                })
                .await;
        }
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_test(&self, id: i32) -> Result<quality_test::Model, ServiceError> {
        quality_test::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Test {} not found", id)))
    }

    /// Newest tests first, with status counts over every matching test
    #[instrument(skip(self))]
    pub async fn list_tests(
        &self,
        filter: TestFilter,
        page: PageRequest,
    ) -> Result<TestListing, ServiceError> {
        let db = &*self.db_pool;

        let rows: Vec<(String, i64)> = filtered(&filter)
            .select_only()
            .column_as(
                Expr::col((quality_test::Entity, quality_test::Column::OverallStatus)),
                "status",
            )
            .column_as(
                Expr::col((quality_test::Entity, quality_test::Column::Id)).count(),
                "n",
            )
            .group_by(quality_test::Column::OverallStatus)
            .into_tuple()
            .all(db)
            .await?;
        let mut counts = TestCounts::default();
        for (status, n) in rows {
            let status = TestStatus::from_str(&status).map_err(|_| {
                ServiceError::InternalError(format!("unknown test status '{}' in store", status))
            })?;
            counts.add(status, n.max(0) as u64);
        }

        let paginator = filtered(&filter)
            .order_by_desc(quality_test::Column::TestDate)
            .order_by_desc(quality_test::Column::Id)
            .paginate(db, page.per_page);
        let tests = paginator.fetch_page(page.index()).await?;
        let items = summarize(db, tests).await?;

        Ok(TestListing {
            items,
            total: counts.total,
            page: page.page,
            per_page: page.per_page,
            counts,
        })
    }

    /// Test with its unit identity, operator, template name and answers
    #[instrument(skip(self))]
    pub async fn get_test_detail(&self, id: i32) -> Result<TestDetail, ServiceError> {
        let db = &*self.db_pool;
        let test = self.get_test(id).await?;

        let missing = |what: &str| ServiceError::NotFound(format!("{} for test {} not found", what, id));
        let sku = sku::Entity::find_by_id(test.sku_id)
            .one(db)
            .await?
            .ok_or_else(|| missing("SKU"))?;
        let batch = batch::Entity::find_by_id(test.batch_id)
            .one(db)
            .await?
            .ok_or_else(|| missing("Batch"))?;
        let barcode = barcode::Entity::find_by_id(test.barcode_id)
            .one(db)
            .await?
            .ok_or_else(|| missing("Barcode"))?;
        let operator = user::Entity::find_by_id(test.user_id)
            .one(db)
            .await?
            .map(|u| u.username)
            .unwrap_or_default();
        let template_name = match test.template_id {
            Some(template_id) => test_template::Entity::find_by_id(template_id)
                .one(db)
                .await?
                .map(|t| t.name),
            None => None,
        };

        let answers = test_answer::Entity::find()
            .filter(test_answer::Column::TestId.eq(id))
            .find_also_related(test_question::Entity)
            .order_by_asc(test_answer::Column::QuestionId)
            .all(db)
            .await?
            .into_iter()
            .map(|(answer, question)| AnswerDetail {
                question_id: answer.question_id,
                question_text: question.map(|q| q.question_text).unwrap_or_default(),
                is_passed: answer.is_passed,
                remarks: answer.remarks,
            })
            .collect();

        Ok(TestDetail {
            test,
            sku,
            batch,
            barcode,
            operator,
            template_name,
            answers,
        })
    }
}

/// Pairs submitted answers with template questions. Every question gets an
/// answer; unknown or repeated question ids are rejected.
fn match_answers(
    questions: &[test_question::Model],
    submitted: Vec<AnswerInput>,
) -> Result<Vec<AnswerInput>, ServiceError> {
    let known: HashSet<i32> = questions.iter().map(|q| q.id).collect();
    let mut by_question: HashMap<i32, AnswerInput> = HashMap::with_capacity(submitted.len());

    for answer in submitted {
        if !known.contains(&answer.question_id) {
            return Err(ServiceError::ValidationError(format!(
                "question {} is not part of the selected template",
                answer.question_id
            )));
        }
        if by_question.contains_key(&answer.question_id) {
            return Err(ServiceError::ValidationError(format!(
                "question {} was answered more than once",
                answer.question_id
            )));
        }
        by_question.insert(answer.question_id, answer);
    }

    Ok(questions
        .iter()
        .map(|q| {
            by_question.remove(&q.id).unwrap_or(AnswerInput {
                question_id: q.id,
                passed: false,
                remarks: String::new(),
            })
        })
        .collect())
}

fn filtered(filter: &TestFilter) -> Select<quality_test::Entity> {
    let mut query = quality_test::Entity::find();

    if let Some(from) = filter.from_date {
        query = query.filter(quality_test::Column::TestDate.gte(start_of_day(from)));
    }
    if let Some(to) = filter.to_date {
        if let Some(next) = to.succ_opt() {
            query = query.filter(quality_test::Column::TestDate.lt(start_of_day(next)));
        }
    }
    if let Some(code) = non_blank(&filter.sku) {
        query = query
            .inner_join(sku::Entity)
            .filter(sku::Column::Code.eq(code));
    }
    if let Some(batch_id) = filter.batch_id {
        query = query.filter(quality_test::Column::BatchId.eq(batch_id));
    }
    if let Some(needle) = non_blank(&filter.barcode) {
        query = query.inner_join(barcode::Entity).filter(contains_ignore_case(
            (barcode::Entity, barcode::Column::SequenceNumber),
            needle,
        ));
    }
    if let Some(template_id) = filter.template_id {
        query = query.filter(quality_test::Column::TemplateId.eq(template_id));
    }

    query
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Resolves display names for a page of tests with one lookup per table
async fn summarize<C: ConnectionTrait>(
    db: &C,
    tests: Vec<quality_test::Model>,
) -> Result<Vec<TestSummary>, ServiceError> {
    let ids = |f: fn(&quality_test::Model) -> Option<i32>| -> Vec<i32> {
        tests.iter().filter_map(f).collect::<HashSet<_>>().into_iter().collect()
    };

    let skus: HashMap<i32, String> = sku::Entity::find()
        .filter(sku::Column::Id.is_in(ids(|t| Some(t.sku_id))))
        .all(db)
        .await?
        .into_iter()
        .map(|s| (s.id, s.code))
        .collect();
    let barcodes: HashMap<i32, String> = barcode::Entity::find()
        .filter(barcode::Column::Id.is_in(ids(|t| Some(t.barcode_id))))
        .all(db)
        .await?
        .into_iter()
        .map(|b| (b.id, b.sequence_number))
        .collect();
    let users: HashMap<i32, String> = user::Entity::find()
        .filter(user::Column::Id.is_in(ids(|t| Some(t.user_id))))
        .all(db)
        .await?
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();
    let templates: HashMap<i32, String> = test_template::Entity::find()
        .filter(test_template::Column::Id.is_in(ids(|t| t.template_id)))
        .all(db)
        .await?
        .into_iter()
        .map(|t| (t.id, t.name))
        .collect();

    Ok(tests
        .into_iter()
        .map(|test| TestSummary {
            sku_code: skus.get(&test.sku_id).cloned().unwrap_or_default(),
            sequence_number: barcodes.get(&test.barcode_id).cloned().unwrap_or_default(),
            operator: users.get(&test.user_id).cloned().unwrap_or_default(),
            template_name: test.template_id.and_then(|id| templates.get(&id).cloned()),
            test,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn question(id: i32) -> test_question::Model {
        test_question::Model {
            id,
            template_id: 1,
            question_text: format!("Check {}", id),
            created_at: Utc::now(),
        }
    }

    fn answer(question_id: i32, passed: bool) -> AnswerInput {
        AnswerInput {
            question_id,
            passed,
            remarks: String::new(),
        }
    }

    #[test]
    fn unanswered_questions_default_to_failed() {
        let questions = vec![question(1), question(2), question(3)];
        let matched = match_answers(&questions, vec![answer(2, true)]).unwrap();

        assert_eq!(
            matched,
            vec![answer(1, false), answer(2, true), answer(3, false)]
        );
    }

    #[test]
    fn foreign_question_is_rejected() {
        let questions = vec![question(1)];
        assert_matches!(
            match_answers(&questions, vec![answer(9, true)]),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn repeated_question_is_rejected() {
        let questions = vec![question(1), question(2)];
        assert_matches!(
            match_answers(&questions, vec![answer(1, true), answer(1, false)]),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn counts_accumulate_per_status() {
        let mut counts = TestCounts::default();
        counts.add(TestStatus::Passed, 3);
        counts.add(TestStatus::Failed, 1);
        counts.add(TestStatus::Pending, 2);
        assert_eq!(
            counts,
            TestCounts {
                total: 6,
                passed: 3,
                failed: 1,
                pending: 2
            }
        );
    }

    #[test]
    fn date_filter_is_inclusive_of_the_whole_last_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(start_of_day(day).to_rfc3339(), "2024-03-09T00:00:00+00:00");
    }
}
