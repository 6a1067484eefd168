/// Generate the methods every typed builder shares. The builder type must have
/// a `qb: QueryBuilder` field.
///
/// Usage:
/// ```ignore
/// impl SelectQueryBuilder {
///     impl_builder_common!();
/// }
/// ```
macro_rules! impl_builder_common {
    () => {
        /// The expression map under construction.
        pub fn expression_map(&self) -> &$crate::qb::ExpressionMap {
            &self.qb.expression_map
        }

        /// Unwrap into the untyped builder.
        pub fn into_query_builder(self) -> $crate::qb::QueryBuilder {
            self.qb
        }

        /// Set a named parameter referenced as `:name` in string conditions.
        pub fn set_parameter(mut self, name: &str, value: impl Into<$crate::value::Value>) -> Self {
            self.qb.set_parameter(name, value.into());
            self
        }

        /// Set several named parameters, e.g. from `params!` or a sub-query.
        pub fn set_parameters<K: Into<String>>(
            mut self,
            params: impl IntoIterator<Item = (K, $crate::value::Value)>,
        ) -> Self {
            for (name, value) in params {
                let name = name.into();
                self.qb.set_parameter(&name, value);
            }
            self
        }

        /// Named parameters plus the values extracted from structured conditions,
        /// for embedding this query into another one.
        pub fn get_parameters(&self) -> $crate::error::OrmResult<std::collections::HashMap<String, $crate::value::Value>> {
            self.qb.get_parameters()
        }

        /// Append `/* comment */` to the statement.
        pub fn comment(mut self, comment: impl Into<String>) -> Self {
            self.qb.expression_map.comment = Some(comment.into());
            self
        }

        /// Render identifiers without quoting.
        pub fn disable_escaping(mut self) -> Self {
            self.qb.expression_map.disable_escaping = true;
            self
        }

        /// Run on this runner instead of acquiring one per execution.
        pub fn set_query_runner(mut self, runner: std::sync::Arc<$crate::runner::QueryRunner>) -> Self {
            self.qb.runner = Some(runner);
            self
        }

        /// Wrap execution in a transaction when none is active.
        pub fn use_transaction(mut self, enabled: bool) -> Self {
            self.qb.expression_map.use_transaction = enabled;
            self
        }

        /// Enable or disable entity subscribers for this query.
        pub fn call_listeners(mut self, enabled: bool) -> Self {
            self.qb.expression_map.call_listeners = enabled;
            self
        }

        /// Add `WITH alias AS (query)`.
        pub fn add_common_table_expression(
            mut self,
            query: impl Into<$crate::qb::CteQuery>,
            alias: &str,
            options: $crate::qb::CteOptions,
        ) -> Self {
            self.qb.add_cte(query.into(), alias, options);
            self
        }

        /// The statement with `:name` placeholders.
        pub fn get_query(&self) -> $crate::error::OrmResult<String> {
            self.qb.get_query()
        }

        /// The statement in the dialect's placeholder syntax.
        pub fn get_sql(&self) -> $crate::error::OrmResult<String> {
            self.qb.get_query_and_parameters().map(|(sql, _)| sql)
        }

        /// The statement plus its ordered parameters, exactly as sent to the driver.
        pub fn get_query_and_parameters(&self) -> $crate::error::OrmResult<(String, Vec<$crate::value::Value>)> {
            self.qb.get_query_and_parameters()
        }
    };
}

/// Generate `where_` and friends for builders with a WHERE clause.
macro_rules! impl_where_methods {
    () => {
        /// Replace all where conditions.
        pub fn where_(mut self, condition: impl Into<$crate::qb::WhereCondition>) -> Self {
            self.qb.expression_map.clear_wheres();
            self.qb.add_where($crate::qb::Conjunction::None, condition.into());
            self
        }

        /// Replace all where conditions, setting named parameters in the same call.
        pub fn where_with<K: Into<String>>(
            self,
            condition: impl Into<$crate::qb::WhereCondition>,
            params: impl IntoIterator<Item = (K, $crate::value::Value)>,
        ) -> Self {
            self.where_(condition).set_parameters(params)
        }

        /// Add an AND condition.
        pub fn and_where(mut self, condition: impl Into<$crate::qb::WhereCondition>) -> Self {
            self.qb.add_where($crate::qb::Conjunction::And, condition.into());
            self
        }

        /// Add an AND condition with named parameters.
        pub fn and_where_with<K: Into<String>>(
            self,
            condition: impl Into<$crate::qb::WhereCondition>,
            params: impl IntoIterator<Item = (K, $crate::value::Value)>,
        ) -> Self {
            self.and_where(condition).set_parameters(params)
        }

        /// Add an OR condition.
        pub fn or_where(mut self, condition: impl Into<$crate::qb::WhereCondition>) -> Self {
            self.qb.add_where($crate::qb::Conjunction::Or, condition.into());
            self
        }

        /// Add an OR condition with named parameters.
        pub fn or_where_with<K: Into<String>>(
            self,
            condition: impl Into<$crate::qb::WhereCondition>,
            params: impl IntoIterator<Item = (K, $crate::value::Value)>,
        ) -> Self {
            self.or_where(condition).set_parameters(params)
        }

        /// Replace all where conditions with `primary key IN (ids)`.
        pub fn where_in_ids<T: Into<$crate::value::Value>>(
            mut self,
            ids: impl IntoIterator<Item = T>,
        ) -> $crate::error::OrmResult<Self> {
            self.qb.expression_map.clear_wheres();
            self.qb.add_where_ids($crate::qb::Conjunction::None, ids.into_iter().map(Into::into).collect())?;
            Ok(self)
        }

        /// AND `primary key IN (ids)`.
        pub fn and_where_in_ids<T: Into<$crate::value::Value>>(
            mut self,
            ids: impl IntoIterator<Item = T>,
        ) -> $crate::error::OrmResult<Self> {
            self.qb.add_where_ids($crate::qb::Conjunction::And, ids.into_iter().map(Into::into).collect())?;
            Ok(self)
        }

        /// OR `primary key IN (ids)`.
        pub fn or_where_in_ids<T: Into<$crate::value::Value>>(
            mut self,
            ids: impl IntoIterator<Item = T>,
        ) -> $crate::error::OrmResult<Self> {
            self.qb.add_where_ids($crate::qb::Conjunction::Or, ids.into_iter().map(Into::into).collect())?;
            Ok(self)
        }

        /// AND a condition produced by a callback that receives the builder,
        /// typically to build a sub-query.
        ///
        /// ```ignore
        /// let posts = qb.and_where_fn(|qb| {
        ///     let sub = qb.sub_query().select(&["u.id"]).from("User", "u")?.where_("u.active = true");
        ///     qb.merge_parameters(sub.get_parameters()?);
        ///     Ok(format!("p.authorId IN ({})", sub.get_query()?))
        /// })?;
        /// ```
        pub fn and_where_fn(
            mut self,
            build: impl FnOnce(&mut Self) -> $crate::error::OrmResult<String>,
        ) -> $crate::error::OrmResult<Self> {
            let condition = build(&mut self)?;
            Ok(self.and_where(condition))
        }

        /// OR a condition produced by a callback that receives the builder.
        pub fn or_where_fn(
            mut self,
            build: impl FnOnce(&mut Self) -> $crate::error::OrmResult<String>,
        ) -> $crate::error::OrmResult<Self> {
            let condition = build(&mut self)?;
            Ok(self.or_where(condition))
        }

        /// Child SELECT builder whose native parameter keys cannot collide with
        /// this query's.
        pub fn sub_query(&mut self) -> $crate::qb::SelectQueryBuilder {
            self.qb.sub_query()
        }

        /// Merge parameters (usually a sub-query's) into this builder in place.
        pub fn merge_parameters(&mut self, params: std::collections::HashMap<String, $crate::value::Value>) {
            for (name, value) in params {
                self.qb.set_parameter(&name, value);
            }
        }
    };
}
