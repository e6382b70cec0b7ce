use crate::{
    db::{self, DbPool},
    entities::{quality_test, test_answer, test_question, test_template},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
    /// Question prompts in display order
    #[serde(default)]
    #[validate(custom = "validate_question_texts")]
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddQuestionRequest {
    #[validate(length(min = 1, max = 255))]
    pub question_text: String,
}

/// A template and its questions in display order
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TemplateDetail {
    #[serde(flatten)]
    pub template: test_template::Model,
    pub questions: Vec<test_question::Model>,
}

fn validate_question_texts(questions: &Vec<String>) -> Result<(), ValidationError> {
    if questions
        .iter()
        .all(|q| !q.trim().is_empty() && q.chars().count() <= 255)
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("questions");
        err.message = Some("each question must be 1 to 255 characters".into());
        Err(err)
    }
}

/// Service for test templates and their questions
#[derive(Clone)]
pub struct TemplateService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl TemplateService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a template with its initial questions
    #[instrument(skip(self))]
    pub async fn create_template(
        &self,
        request: CreateTemplateRequest,
    ) -> Result<TemplateDetail, ServiceError> {
        request.validate()?;
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::ValidationError(
                "template name must not be blank".to_string(),
            ));
        }

        let detail = db::transaction(&self.db_pool, move |txn| {
            Box::pin(async move {
                let now = Utc::now();
                let template = test_template::ActiveModel {
                    name: Set(name.clone()),
                    description: Set(request.description),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(|e| {
                    ServiceError::on_unique_violation(e, || {
                        ServiceError::Conflict(format!("template '{}' already exists", name))
                    })
                })?;

                // One insert per question keeps ids in prompt order
                let mut questions = Vec::with_capacity(request.questions.len());
                for text in request.questions {
                    let question = test_question::ActiveModel {
                        template_id: Set(template.id),
                        question_text: Set(text.trim().to_string()),
                        created_at: Set(now),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await?;
                    questions.push(question);
                }

                Ok::<_, ServiceError>(TemplateDetail {
                    template,
                    questions,
                })
            })
        })
        .await?;

        info!(
            template_id = detail.template.id,
            questions = detail.questions.len(),
            "test template created"
        );
        Ok(detail)
    }

    /// Appends a question at the end of a template
    #[instrument(skip(self))]
    pub async fn add_question(
        &self,
        template_id: i32,
        request: AddQuestionRequest,
    ) -> Result<test_question::Model, ServiceError> {
        request.validate()?;
        let text = request.question_text.trim().to_string();
        if text.is_empty() {
            return Err(ServiceError::ValidationError(
                "question text must not be blank".to_string(),
            ));
        }
        self.get_template(template_id).await?;

        Ok(test_question::ActiveModel {
            template_id: Set(template_id),
            question_text: Set(text),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db_pool)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn list_templates(&self) -> Result<Vec<test_template::Model>, ServiceError> {
        Ok(test_template::Entity::find()
            .order_by_asc(test_template::Column::Name)
            .all(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_template(&self, id: i32) -> Result<test_template::Model, ServiceError> {
        test_template::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Test template {} not found", id)))
    }

    /// Template with questions in id order
    #[instrument(skip(self))]
    pub async fn get_template_with_questions(
        &self,
        id: i32,
    ) -> Result<TemplateDetail, ServiceError> {
        let template = self.get_template(id).await?;
        let questions = test_question::Entity::find()
            .filter(test_question::Column::TemplateId.eq(id))
            .order_by_asc(test_question::Column::Id)
            .all(&*self.db_pool)
            .await?;
        Ok(TemplateDetail {
            template,
            questions,
        })
    }

    /// Deletes a template and its questions. Tests that used it are kept with
    /// no template; their answers to the removed questions go with them.
    #[instrument(skip(self))]
    pub async fn delete_template(&self, id: i32) -> Result<u64, ServiceError> {
        let detached = db::transaction(&self.db_pool, move |txn| {
            Box::pin(async move {
                test_template::Entity::find_by_id(id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Test template {} not found", id))
                    })?;

                let detached = quality_test::Entity::update_many()
                    .col_expr(
                        quality_test::Column::TemplateId,
                        Expr::value(Option::<i32>::None),
                    )
                    .filter(quality_test::Column::TemplateId.eq(id))
                    .exec(txn)
                    .await?;

                let question_ids: Vec<i32> = test_question::Entity::find()
                    .select_only()
                    .column(test_question::Column::Id)
                    .filter(test_question::Column::TemplateId.eq(id))
                    .into_tuple()
                    .all(txn)
                    .await?;
                test_answer::Entity::delete_many()
                    .filter(test_answer::Column::QuestionId.is_in(question_ids))
                    .exec(txn)
                    .await?;
                test_question::Entity::delete_many()
                    .filter(test_question::Column::TemplateId.eq(id))
                    .exec(txn)
                    .await?;
                test_template::Entity::delete_by_id(id).exec(txn).await?;

                Ok::<_, ServiceError>(detached.rows_affected)
            })
        })
        .await?;

        info!(template_id = id, detached_tests = detached, "test template deleted");
        self.event_sender
            .send_or_log(Event::TemplateDeleted {
                template_id: id,
                detached_tests: detached,
            })
            .await;
        Ok(detached)
    }
}
