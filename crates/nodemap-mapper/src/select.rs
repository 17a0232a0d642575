//! Read path: SELECT construction for plain and relation loads.

use crate::mapper::{RELATION_ORIGIN_COLUMN, RdbMapper, proxy_value, relation_id_column};
use nodemap_core::error::IdentityErrorKind;
use nodemap_core::{
    AttributeDescription, AttributeKind, Combinator, Criteria, Error, ObjectProxy, Operand,
    Operator, OrderBy, PagingInfo, RelationDescription, RelationKind, Result, SortDirection,
    TypeDescription, Value,
};
use nodemap_query::{BoundSelect, Expr, Join, Params, SelectStatement};

/// Optional parts of a select.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    /// Alias of the mapped table; defaults to the type name.
    pub alias: Option<String>,
    /// Attributes to project; defaults to all column and reference attributes.
    pub attributes: Option<Vec<String>>,
    /// Explicit order; defaults to the type's declared order.
    pub order_by: Vec<OrderBy>,
    pub paging: Option<PagingInfo>,
    /// Statement cache key; derived from the statement shape when absent.
    pub cache_key: Option<String>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn attributes(mut self, names: &[&str]) -> Self {
        self.attributes = Some(names.iter().map(|n| (*n).to_string()).collect());
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    #[must_use]
    pub fn paging(mut self, paging: PagingInfo) -> Self {
        self.paging = Some(paging);
        self
    }

    #[must_use]
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// Parameter prefix of the related ids in relation selects.
const RELATED_PARAM: &str = "r";

impl RdbMapper {
    /// Build (or reuse) the select for objects of this type matching `criteria`.
    ///
    /// The statement shape is looked up in the statement cache; criteria
    /// values and the paging offset are bound on every call.
    #[tracing::instrument(level = "debug", skip(self, criteria, options), fields(type_name = %self.ty.name))]
    pub fn get_select_sql(&self, criteria: &[Criteria], options: &SelectOptions) -> Result<BoundSelect> {
        self.check_criteria(criteria)?;
        let alias = self.alias(options);
        let attributes = self.projected_attributes(options)?;
        let key = match &options.cache_key {
            Some(key) => key.clone(),
            None => self.cache_key(&alias, &attributes, criteria, options, None),
        };

        let (statement, cached) = self.cache.get_or_build(&key, || {
            let stmt = self.base_select(&key, &alias, &attributes, criteria)?;
            let stmt = self.apply_order(stmt, &alias, &options.order_by, None)?;
            Ok(apply_paging(stmt, options.paging))
        })?;

        let offset = options.paging.map_or(0, |p| p.offset);
        Ok(BoundSelect::new(statement, criteria_params(criteria), offset, cached))
    }

    /// Build (or reuse) the select for objects of this type related to `proxies`.
    ///
    /// `other_role` is the role of the proxied objects as seen from this type.
    #[tracing::instrument(level = "debug", skip(self, proxies, criteria, options), fields(type_name = %self.ty.name, count = proxies.len()))]
    pub fn get_relation_select_sql(
        &self,
        proxies: &[ObjectProxy],
        other_role: &str,
        criteria: &[Criteria],
        options: &SelectOptions,
    ) -> Result<BoundSelect> {
        self.check_criteria(criteria)?;
        let relation = self.ty.require_relation(other_role)?;
        let other = self.schema.type_description(&relation.other_type)?;
        for proxy in proxies {
            if proxy.type_name() != other.name {
                return Err(Error::identity(
                    IdentityErrorKind::TypeMismatch,
                    format!(
                        "'{}' passed for role '{other_role}' of '{}', expected '{}'",
                        proxy.oid(),
                        self.ty.name,
                        other.name
                    ),
                ));
            }
        }

        let related = related_values(relation, other, proxies);
        let alias = self.alias(options);
        let attributes = self.projected_attributes(options)?;
        let key = match &options.cache_key {
            Some(key) => key.clone(),
            None => self.cache_key(
                &alias,
                &attributes,
                criteria,
                options,
                Some(&format!("rel:{other_role}:{}", related.len())),
            ),
        };

        let (statement, cached) = self.cache.get_or_build(&key, || {
            let stmt = self.base_select(&key, &alias, &attributes, criteria)?;
            let stmt = self.restrict_to_related(stmt, &alias, relation, related.len())?;
            let stmt = self.apply_order(stmt, &alias, &options.order_by, Some(relation))?;
            Ok(apply_paging(stmt, options.paging))
        })?;

        let mut params = criteria_params(criteria);
        for (j, value) in related.into_iter().enumerate() {
            params.insert(format!("{RELATED_PARAM}_{j}"), value);
        }
        let offset = options.paging.map_or(0, |p| p.offset);
        Ok(BoundSelect::new(statement, params, offset, cached))
    }

    fn alias(&self, options: &SelectOptions) -> String {
        options.alias.clone().unwrap_or_else(|| self.ty.name.clone())
    }

    fn check_criteria(&self, criteria: &[Criteria]) -> Result<()> {
        for c in criteria {
            if c.type_name != self.ty.name {
                return Err(self.unsupported(format!(
                    "criteria on '{}.{}' passed to the mapper of '{}'",
                    c.type_name, c.attribute, self.ty.name
                )));
            }
            self.ty.require_column_attribute(&c.attribute)?;
        }
        Ok(())
    }

    /// Primary keys first, then the requested (or default) attributes, without duplicates.
    fn projected_attributes(&self, options: &SelectOptions) -> Result<Vec<&AttributeDescription>> {
        let mut projected: Vec<&AttributeDescription> = Vec::new();
        for pk in &self.ty.pk_names {
            projected.push(self.ty.require_attribute(pk)?);
        }
        let requested: Vec<&AttributeDescription> = match &options.attributes {
            Some(names) => names
                .iter()
                .map(|n| self.ty.require_attribute(n))
                .collect::<Result<_>>()?,
            None => self
                .ty
                .column_attributes()
                .chain(self.ty.reference_attributes())
                .collect(),
        };
        for attr in requested {
            if !attr.is_transient() && !projected.iter().any(|p| p.name == attr.name) {
                projected.push(attr);
            }
        }
        Ok(projected)
    }

    fn cache_key(
        &self,
        alias: &str,
        attributes: &[&AttributeDescription],
        criteria: &[Criteria],
        options: &SelectOptions,
        relation: Option<&str>,
    ) -> String {
        let mut names: Vec<&str> = attributes.iter().map(|a| a.name.as_str()).collect();
        names.sort_unstable();
        let criteria: Vec<String> = criteria.iter().map(Criteria::id).collect();
        let order: Vec<String> = options.order_by.iter().map(ToString::to_string).collect();
        let mut key = format!(
            "{}|{alias}|{}|{}|{}|{}",
            self.ty.table,
            names.join(","),
            criteria.join(" "),
            order.join(","),
            options.paging.map_or_else(String::new, |p| p.page_size.to_string())
        );
        if let Some(relation) = relation {
            key.push('|');
            key.push_str(relation);
        }
        key
    }

    /// Projection, reference joins and the compiled criteria.
    fn base_select(
        &self,
        key: &str,
        alias: &str,
        attributes: &[&AttributeDescription],
        criteria: &[Criteria],
    ) -> Result<SelectStatement> {
        let mut stmt = SelectStatement::new(key, &self.ty.table, alias);
        for attr in attributes {
            let (next, expr) = self.attribute_expr(stmt, alias, attr)?;
            stmt = next.column(expr, &attr.name);
        }
        if let Some(condition) = self.compile_criteria(alias, criteria)? {
            stmt = stmt.filter(condition);
        }
        tracing::debug!(key, joins = stmt.joins().len(), "Built select shape");
        Ok(stmt)
    }

    /// The expression selecting `attr`, adding the reference join it needs.
    fn attribute_expr(
        &self,
        stmt: SelectStatement,
        alias: &str,
        attr: &AttributeDescription,
    ) -> Result<(SelectStatement, Expr)> {
        match &attr.kind {
            AttributeKind::Column => Ok((stmt, Expr::col(alias, &attr.column))),
            AttributeKind::Reference {
                reference_type,
                reference_attribute,
                ..
            } => {
                let relation = self.schema.reference_relation(&self.ty, attr)?;
                let (join_alias, join) = self.reference_join(stmt.id(), alias, relation)?;
                let referenced = self.schema.type_description(reference_type)?;
                let expr = Expr::col(&join_alias, referenced.column_of(reference_attribute));
                Ok((stmt.join(join), expr))
            }
            AttributeKind::Transient => Err(self.unsupported(format!(
                "transient attribute '{}.{}' has no column",
                self.ty.name, attr.name
            ))),
        }
    }

    /// The LEFT JOIN a reference attribute riding on `relation` needs.
    ///
    /// All references over one relation share the join. A one-to-many
    /// reference picks the related row with the smallest primary key,
    /// compared column by column.
    fn reference_join(&self, key: &str, alias: &str, relation: &RelationDescription) -> Result<(String, Join)> {
        let other = self.schema.type_description(&relation.other_type)?;
        let join_alias = if relation.other_role == alias {
            format!("{}_ref", relation.other_role)
        } else {
            relation.other_role.clone()
        };
        let on = match &relation.kind {
            RelationKind::ManyToOne { fk_name, id_name } => Expr::col(&join_alias, other.column_of(id_name))
                .eq(Expr::col(alias, self.ty.column_of(fk_name))),
            RelationKind::OneToMany { id_name, fk_name } => {
                let fk = other.column_of(fk_name);
                let owner = Expr::col(alias, self.ty.column_of(id_name));
                let mut on = Expr::col(&join_alias, fk).eq(owner.clone());
                // Smallest key in key order: one MIN per key column, each
                // restricted to the rows sharing the columns before it.
                let mut fixed: Vec<&str> = Vec::new();
                for (i, pk) in other.pk_names.iter().enumerate() {
                    let pk = other.column_of(pk);
                    if pk == fk {
                        continue;
                    }
                    let sub_alias = format!("{join_alias}_min{i}");
                    let mut condition = Expr::col(&sub_alias, fk).eq(owner.clone());
                    for prev in &fixed {
                        condition = condition.and(Expr::col(&sub_alias, *prev).eq(Expr::col(&join_alias, *prev)));
                    }
                    let first = SelectStatement::new(format!("{key}#{join_alias}#{i}"), &other.table, &sub_alias)
                        .expr(Expr::function("MIN", vec![Expr::col(&sub_alias, pk)]))
                        .filter(condition);
                    on = on.and(Expr::col(&join_alias, pk).eq(Expr::subquery(first)));
                    fixed.push(pk);
                }
                on
            }
            RelationKind::ManyToMany { .. } => {
                return Err(self.unsupported(format!(
                    "reference over many-to-many role '{}' of '{}'",
                    relation.other_role, self.ty.name
                )));
            }
        };
        Ok((join_alias.clone(), Join::left(&other.table, join_alias, on)))
    }

    /// Compile criteria into one condition with `p{i}` parameters.
    ///
    /// Conditions fold left to right; the accumulated condition is
    /// parenthesized before each further combinator.
    fn compile_criteria(&self, alias: &str, criteria: &[Criteria]) -> Result<Option<Expr>> {
        let mut condition: Option<Expr> = None;
        for (i, c) in criteria.iter().enumerate() {
            let attr = self.ty.require_column_attribute(&c.attribute)?;
            let compiled = compile_condition(Expr::col(alias, &attr.column), c, i);
            condition = Some(match condition {
                None => compiled,
                Some(prev) => {
                    let prev = if i >= 2 { prev.paren() } else { prev };
                    match c.combinator {
                        Combinator::And => prev.and(compiled),
                        Combinator::Or => prev.or(compiled),
                    }
                }
            });
        }
        Ok(condition)
    }

    /// Restrict a relation select to the rows related to the bound `r_{j}` values.
    fn restrict_to_related(
        &self,
        stmt: SelectStatement,
        alias: &str,
        relation: &RelationDescription,
        count: usize,
    ) -> Result<SelectStatement> {
        let params: Vec<Expr> = (0..count)
            .map(|j| Expr::param(format!("{RELATED_PARAM}_{j}")))
            .collect();
        let related_in = |column: Expr| {
            if params.is_empty() {
                Expr::raw("1 = 0")
            } else {
                column.in_list(params.clone())
            }
        };
        match &relation.kind {
            RelationKind::OneToMany { id_name, .. } => {
                Ok(stmt.filter(related_in(Expr::col(alias, self.ty.column_of(id_name)))))
            }
            RelationKind::ManyToOne { fk_name, .. } => {
                Ok(stmt.filter(related_in(Expr::col(alias, self.ty.column_of(fk_name)))))
            }
            RelationKind::ManyToMany { this_end, other_end } => {
                let (RelationKind::OneToMany { id_name, fk_name: this_fk }, RelationKind::ManyToOne { fk_name: other_fk, .. }) =
                    (&this_end.kind, &other_end.kind)
                else {
                    return Err(self.unsupported(format!(
                        "malformed many-to-many role '{}' of '{}'",
                        relation.other_role, self.ty.name
                    )));
                };
                let junction = self.schema.type_description(&this_end.other_type)?;
                let j = junction.name.as_str();
                let on = Expr::col(j, junction.column_of(this_fk)).eq(Expr::col(alias, self.ty.column_of(id_name)));
                let origin = Expr::col(j, junction.column_of(other_fk));
                let mut stmt = stmt.join(Join::inner(&junction.table, j, on));
                for (i, pk) in junction.pk_names.iter().enumerate() {
                    stmt = stmt.column(Expr::col(j, junction.column_of(pk)), relation_id_column(i));
                }
                Ok(stmt
                    .column(origin.clone(), RELATION_ORIGIN_COLUMN)
                    .filter(related_in(origin)))
            }
        }
    }

    /// ORDER BY: explicit order, else the relation's sort key, else the type's default order.
    fn apply_order(
        &self,
        mut stmt: SelectStatement,
        alias: &str,
        explicit: &[OrderBy],
        relation: Option<&RelationDescription>,
    ) -> Result<SelectStatement> {
        if explicit.is_empty() {
            if let Some(relation) = relation {
                if let Some((carrier_alias, column, direction)) = self.relation_sort_column(alias, relation)? {
                    return Ok(stmt.order_by(Expr::col(carrier_alias, column), direction));
                }
            }
        }
        let orders: Vec<OrderBy> = if !explicit.is_empty() {
            explicit.to_vec()
        } else if !self.ty.default_order.is_empty() {
            self.ty.default_order.clone()
        } else if let Some(def) = self.ty.own_sort_key(None) {
            vec![OrderBy {
                attribute: def.sort_field.clone(),
                direction: def.sort_direction,
            }]
        } else {
            Vec::new()
        };
        for order in orders {
            let attr = self.ty.require_attribute(&order.attribute)?;
            let (next, expr) = self.attribute_expr(stmt, alias, attr)?;
            stmt = next.order_by(expr, order.direction);
        }
        Ok(stmt)
    }

    /// The sort column for objects loaded through `relation`, if the relation is sortable.
    fn relation_sort_column(
        &self,
        alias: &str,
        relation: &RelationDescription,
    ) -> Result<Option<(String, String, SortDirection)>> {
        if let Some(junction) = relation.junction_type() {
            let junction = self.schema.type_description(junction)?;
            return Ok(junction.own_sort_key(Some(&relation.other_role)).map(|def| {
                (
                    junction.name.clone(),
                    junction.column_of(&def.sort_field).to_string(),
                    def.sort_direction,
                )
            }));
        }
        Ok(self.ty.own_sort_key(Some(&relation.other_role)).map(|def| {
            (
                alias.to_string(),
                self.ty.column_of(&def.sort_field).to_string(),
                def.sort_direction,
            )
        }))
    }
}

fn apply_paging(stmt: SelectStatement, paging: Option<PagingInfo>) -> SelectStatement {
    match paging {
        Some(p) => stmt.limit(p.page_size),
        None => stmt,
    }
}

fn is_null_comparison(c: &Criteria) -> bool {
    matches!(c.operand, Operand::Single(Value::Null))
}

fn compile_condition(column: Expr, c: &Criteria, i: usize) -> Expr {
    let param = Expr::param(format!("p{i}"));
    match c.operator {
        Operator::In => {
            let count = c.operand.values().len();
            if count == 0 {
                Expr::raw("1 = 0")
            } else {
                column.in_list((0..count).map(|j| Expr::param(format!("p{i}_{j}"))).collect())
            }
        }
        Operator::Eq if is_null_comparison(c) => column.is_null(),
        Operator::Ne if is_null_comparison(c) => column.is_not_null(),
        Operator::Eq => column.eq(param),
        Operator::Ne => column.ne(param),
        Operator::Lt => column.lt(param),
        Operator::Le => column.le(param),
        Operator::Gt => column.gt(param),
        Operator::Ge => column.ge(param),
        Operator::Like => column.like(param),
    }
}

/// Parameter values for the conditions compiled by `compile_criteria`.
fn criteria_params(criteria: &[Criteria]) -> Params {
    let mut params = Params::new();
    for (i, c) in criteria.iter().enumerate() {
        match c.operator {
            Operator::In => {
                for (j, v) in c.operand.values().iter().enumerate() {
                    params.insert(format!("p{i}_{j}"), v.clone());
                }
            }
            Operator::Eq | Operator::Ne if is_null_comparison(c) => {}
            _ => {
                let value = c.operand.values().first().cloned().unwrap_or(Value::Null);
                params.insert(format!("p{i}"), value);
            }
        }
    }
    params
}

/// Distinct non-null values identifying the related rows, in proxy order.
fn related_values(relation: &RelationDescription, other: &TypeDescription, proxies: &[ObjectProxy]) -> Vec<Value> {
    let attribute = match &relation.kind {
        // The proxies hold the foreign key to this type.
        RelationKind::OneToMany { fk_name, .. } => fk_name,
        RelationKind::ManyToOne { id_name, .. } => id_name,
        RelationKind::ManyToMany { other_end, .. } => match &other_end.kind {
            RelationKind::ManyToOne { id_name, .. } => id_name,
            _ => &other.pk_names[0],
        },
    };
    let mut values: Vec<Value> = Vec::new();
    for proxy in proxies {
        if let Some(v) = proxy_value(other, proxy, attribute) {
            if !values.iter().any(|known| known.sql_eq(&v)) {
                values.push(v);
            }
        }
    }
    values
}
