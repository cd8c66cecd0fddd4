//! Aggregate function specs and the shared aggregation parameters.
//!
//! Aggregates are `DataFusion` `AggregateUDF`s, so every built-in aggregate
//! (SUM, COUNT, AVG, MIN, MAX, ...) gets its real accumulator semantics,
//! including multi-field intermediate state.
//!
//! Column names are bound to positions once, when [`AggregateParams`] is
//! built. Nothing on the accumulation path looks up a name.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use arrow::row::{RowConverter, SortField};
use datafusion_expr::function::AccumulatorArgs;
use datafusion_expr::{Accumulator, AggregateUDF};

use crate::aggregation::emit::EmitStrategy;
use crate::config::{AggregationConfig, ResultMode};
use crate::error::{Error, Result};
use crate::semantic::EMIT_VERSION_COLUMN;

/// Finds a built-in aggregate function by name or alias, case-insensitively.
#[must_use]
pub fn lookup_aggregate(name: &str) -> Option<Arc<AggregateUDF>> {
    datafusion::functions_aggregate::all_default_aggregate_functions()
        .into_iter()
        .find(|udf| {
            udf.name().eq_ignore_ascii_case(name)
                || udf.aliases().iter().any(|a| a.eq_ignore_ascii_case(name))
        })
}

/// An aggregate call as written in a query: function name and argument
/// columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateCall {
    function: String,
    args: Vec<String>,
    alias: Option<String>,
    distinct: bool,
}

impl AggregateCall {
    /// `function(args...)`.
    pub fn new<I, S>(function: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            function: function.into(),
            args: args.into_iter().map(Into::into).collect(),
            alias: None,
            distinct: false,
        }
    }

    /// Sets the output column name.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Marks the call as `DISTINCT`.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}({})", self.function, self.args.join(", ")))
    }
}

/// One aggregate function bound to its input columns.
#[derive(Debug)]
pub struct AggFuncSpec {
    udf: Arc<AggregateUDF>,
    /// Argument fields as seen by the accumulator, in call order.
    arg_fields: Vec<FieldRef>,
    arg_schema: Schema,
    /// Input-schema positions feeding this aggregate.
    input_positions: Vec<usize>,
    output_name: String,
    return_field: FieldRef,
    distinct: bool,
    /// Types of the accumulator's intermediate state fields.
    state_types: Vec<DataType>,
}

impl AggFuncSpec {
    fn bind(call: &AggregateCall, input_schema: &Schema, operator: &str) -> Result<Self> {
        let udf = lookup_aggregate(&call.function).ok_or_else(|| {
            Error::Configuration(format!("unknown aggregate function '{}'", call.function))
        })?;
        if call.args.is_empty() {
            return Err(Error::Configuration(format!(
                "aggregate '{}' needs at least one argument column",
                call.function
            )));
        }

        let mut input_positions = Vec::with_capacity(call.args.len());
        let mut arg_fields = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let pos = input_schema.index_of(arg).map_err(|_| {
                Error::schema_mismatch(
                    operator,
                    arg,
                    "aggregate argument not found in input schema",
                )
            })?;
            input_positions.push(pos);
            arg_fields.push(Arc::new(input_schema.field(pos).clone()));
        }
        let input_types: Vec<DataType> =
            arg_fields.iter().map(|f| f.data_type().clone()).collect();
        let output_name = call.output_name();
        let return_field = Arc::new(Field::new(
            &output_name,
            udf.return_type(&input_types)?,
            true,
        ));

        let mut spec = Self {
            udf,
            arg_schema: Schema::new(arg_fields.clone()),
            arg_fields,
            input_positions,
            output_name,
            return_field,
            distinct: call.distinct,
            state_types: Vec::new(),
        };
        spec.state_types = spec
            .create_accumulator()?
            .state()?
            .iter()
            .map(datafusion_common::ScalarValue::data_type)
            .collect();
        Ok(spec)
    }

    /// Create a fresh `DataFusion` accumulator for this function.
    pub fn create_accumulator(&self) -> Result<Box<dyn Accumulator>> {
        Ok(self.udf.accumulator(AccumulatorArgs {
            return_field: Arc::clone(&self.return_field),
            schema: &self.arg_schema,
            ignore_nulls: false,
            order_bys: &[],
            is_reversed: false,
            name: self.udf.name(),
            is_distinct: self.distinct,
            exprs: &[],
            expr_fields: &self.arg_fields,
        })?)
    }

    /// Function name as registered.
    #[must_use]
    pub fn function_name(&self) -> &str {
        self.udf.name()
    }

    /// Output column name.
    #[must_use]
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Type of the finalized value.
    #[must_use]
    pub fn return_type(&self) -> &DataType {
        self.return_field.data_type()
    }

    /// Input-schema positions of the arguments.
    #[must_use]
    pub fn input_positions(&self) -> &[usize] {
        &self.input_positions
    }

    /// Types of the intermediate state fields, in `Accumulator::state` order.
    #[must_use]
    pub fn state_types(&self) -> &[DataType] {
        &self.state_types
    }

    fn state_field_name(&self, idx: usize) -> String {
        format!("{}#state{idx}", self.output_name)
    }
}

/// How emission boundaries for the aggregation are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupByMode {
    /// Window, periodic, row-count or end-of-stream emission.
    Standard,
    /// Boundaries supplied by application grouping logic.
    UserDefined,
}

/// Immutable aggregation parameters, shared by every shard.
#[derive(Debug)]
pub struct AggregateParams {
    name: String,
    input_schema: SchemaRef,
    group_by_positions: Vec<usize>,
    aggregates: Vec<AggFuncSpec>,
    result_mode: ResultMode,
    emit_version: bool,
    group_by_mode: GroupByMode,
    final_schema: SchemaRef,
    intermediate_schema: SchemaRef,
}

impl AggregateParams {
    /// Starts building parameters for the aggregation `name` over
    /// `input_schema`.
    #[must_use]
    pub fn builder(name: impl Into<String>, input_schema: SchemaRef) -> AggregateParamsBuilder {
        AggregateParamsBuilder {
            name: name.into(),
            input_schema,
            group_by: Vec::new(),
            aggregates: Vec::new(),
        }
    }

    /// Operator name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema of the batches fed to the shards.
    #[must_use]
    pub fn input_schema(&self) -> &SchemaRef {
        &self.input_schema
    }

    /// Input positions of the grouping columns.
    #[must_use]
    pub fn group_by_positions(&self) -> &[usize] {
        &self.group_by_positions
    }

    /// Bound aggregate functions, in output order.
    #[must_use]
    pub fn aggregates(&self) -> &[AggFuncSpec] {
        &self.aggregates
    }

    /// Final or intermediate emissions.
    #[must_use]
    pub fn result_mode(&self) -> ResultMode {
        self.result_mode
    }

    /// Whether final emissions carry a version column.
    #[must_use]
    pub fn emit_version(&self) -> bool {
        self.emit_version
    }

    /// How emission boundaries are chosen.
    #[must_use]
    pub fn group_by_mode(&self) -> GroupByMode {
        self.group_by_mode
    }

    /// Schema of final emissions: group columns, aggregate values and, when
    /// enabled, `_tp_version`.
    #[must_use]
    pub fn final_schema(&self) -> &SchemaRef {
        &self.final_schema
    }

    /// Schema of intermediate emissions: group columns followed by every
    /// state field of every aggregate.
    #[must_use]
    pub fn intermediate_schema(&self) -> &SchemaRef {
        &self.intermediate_schema
    }

    /// Schema of emissions in the configured result mode.
    #[must_use]
    pub fn output_schema(&self) -> &SchemaRef {
        match self.result_mode {
            ResultMode::Final => &self.final_schema,
            ResultMode::Intermediate => &self.intermediate_schema,
        }
    }

    /// Row converter for the grouping columns, `None` for global aggregates.
    pub(crate) fn group_row_converter(&self) -> Result<Option<RowConverter>> {
        if self.group_by_positions.is_empty() {
            return Ok(None);
        }
        let fields = self
            .group_by_positions
            .iter()
            .map(|&p| SortField::new(self.input_schema.field(p).data_type().clone()))
            .collect();
        Ok(Some(RowConverter::new(fields)?))
    }

    fn group_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.group_by_positions
            .iter()
            .map(|&p| self.input_schema.field(p).clone())
    }
}

impl fmt::Display for AggregateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<&str> = self
            .group_by_positions
            .iter()
            .map(|&p| self.input_schema.field(p).name().as_str())
            .collect();
        let aggs: Vec<&str> = self.aggregates.iter().map(AggFuncSpec::output_name).collect();
        write!(
            f,
            "{} group_by=[{}] aggregates=[{}] mode={:?}",
            self.name,
            groups.join(", "),
            aggs.join(", "),
            self.result_mode
        )
    }
}

/// Builder for [`AggregateParams`].
#[derive(Debug)]
pub struct AggregateParamsBuilder {
    name: String,
    input_schema: SchemaRef,
    group_by: Vec<String>,
    aggregates: Vec<AggregateCall>,
}

impl AggregateParamsBuilder {
    /// Adds grouping columns.
    #[must_use]
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Adds an aggregate call.
    #[must_use]
    pub fn aggregate(mut self, call: AggregateCall) -> Self {
        self.aggregates.push(call);
        self
    }

    /// Binds every name against the input schema.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] for an invalid `config`, no aggregates, or
    ///   an unknown function.
    /// - [`Error::SchemaMismatch`] for a missing column.
    pub fn build(self, config: &AggregationConfig) -> Result<Arc<AggregateParams>> {
        config.validate()?;
        if self.aggregates.is_empty() {
            return Err(Error::Configuration(format!(
                "aggregation '{}' has no aggregate functions",
                self.name
            )));
        }

        let mut group_by_positions = Vec::with_capacity(self.group_by.len());
        for column in &self.group_by {
            let pos = self.input_schema.index_of(column).map_err(|_| {
                Error::schema_mismatch(
                    &self.name,
                    column,
                    "group-by column not found in input schema",
                )
            })?;
            group_by_positions.push(pos);
        }

        let aggregates = self
            .aggregates
            .iter()
            .map(|call| AggFuncSpec::bind(call, &self.input_schema, &self.name))
            .collect::<Result<Vec<_>>>()?;

        let group_by_mode = if matches!(config.strategy, EmitStrategy::UserDefined) {
            GroupByMode::UserDefined
        } else {
            GroupByMode::Standard
        };

        let mut params = AggregateParams {
            name: self.name,
            input_schema: self.input_schema,
            group_by_positions,
            aggregates,
            result_mode: config.result_mode,
            emit_version: config.emit_version,
            group_by_mode,
            final_schema: Arc::new(Schema::empty()),
            intermediate_schema: Arc::new(Schema::empty()),
        };

        let mut final_fields: Vec<Field> = params.group_fields().collect();
        final_fields.extend(
            params
                .aggregates
                .iter()
                .map(|a| Field::new(a.output_name(), a.return_type().clone(), true)),
        );
        if params.emit_version && params.result_mode == ResultMode::Final {
            final_fields.push(Field::new(EMIT_VERSION_COLUMN, DataType::Int64, false));
        }

        let mut intermediate_fields: Vec<Field> = params.group_fields().collect();
        for agg in &params.aggregates {
            intermediate_fields.extend(
                agg.state_types()
                    .iter()
                    .enumerate()
                    .map(|(i, dt)| Field::new(agg.state_field_name(i), dt.clone(), true)),
            );
        }

        params.final_schema = Arc::new(Schema::new(final_fields));
        params.intermediate_schema = Arc::new(Schema::new(intermediate_fields));

        tracing::debug!(params = %params, "bound aggregation parameters");
        Ok(Arc::new(params))
    }
}
