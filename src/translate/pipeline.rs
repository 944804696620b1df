//! The produce/consume pipeline compiler.
//!
//! `produce(t)` emits the code that generates translator `t`'s tuples;
//! leaves emit a loop over their source, pipeline breakers emit a build
//! phase into a runtime structure followed by a scan phase over it.
//! `consume(t, from, values)` is called by a child after it has produced one
//! tuple into schema values; the consumer processes the tuple and, when it
//! propagates, calls its own parent's consume. Emission order is the call
//! order; everything lands in the single `compute` function (plus generated
//! comparators for OrderBy).

use std::rc::Rc;

use crate::catalog::{Catalog, TableInfo};
use crate::codegen::proxy::{
    Bool, Float64, Int16, Int32, Int64, Int8, ProxyValue, Str,
};
use crate::codegen::{abi, control, Cmp, GepIndex, ProgramBuilder, ProgramRef, ScalarKind};
use crate::plan::expr::aggregate_result_type;
use crate::plan::{expr_type, AggregateFunc, AggregateSlot, Operator, ScalarType, Schema, Side};

use super::expression::eval_expr;
use super::schema_values::{NamedValue, SchemaValues};
use super::{TranslateError, TranslatorFactory, TranslatorId, TranslatorTree};

/// Phase-dependent translator state. Handles live in generated code; the
/// translators only keep the IR values that point at them.
enum OpState<B: ProgramBuilder> {
    None,
    Cross {
        buffer: B::Value,
        tuple_ty: B::Type,
        right_phase: bool,
    },
    Join {
        table: B::Value,
        payload_ty: B::Type,
        probing: bool,
    },
    Group {
        table: B::Value,
        payload_ty: B::Type,
    },
    Order {
        buffer: B::Value,
        tuple_ty: B::Type,
    },
}

/// A counted `for (i = 0; i < len; i++)` loop under emission.
struct CountedLoop<B: ProgramBuilder> {
    idx_slot: B::Value,
    header: B::Block,
    end: B::Block,
    /// Index value loaded at the top of the body.
    idx: B::Value,
}

/// A pointer-chase loop (`for (e = first; e != null; e = next(e))`).
struct ChainLoop<B: ProgramBuilder> {
    slot: B::Value,
    header: B::Block,
    end: B::Block,
    /// Entry pointer loaded at the top of the body.
    entry: B::Value,
}

/// Drives produce/consume over a translator tree, emitting through the
/// program-builder facade.
pub struct PipelineCompiler<'p, B: ProgramBuilder> {
    program: ProgramRef<B>,
    catalog: &'p Catalog,
    tree: TranslatorTree<'p>,
    state: Vec<OpState<B>>,
}

/// Translate a frozen plan into a `compute` function on `program`.
pub fn compile_plan<B: ProgramBuilder>(
    program: &ProgramRef<B>,
    catalog: &Catalog,
    plan: &Operator,
) -> Result<(), TranslateError> {
    let tree = TranslatorFactory::build(plan)?;
    let state = (0..tree.len()).map(|_| OpState::None).collect();
    let mut compiler = PipelineCompiler {
        program: Rc::clone(program),
        catalog,
        tree,
        state,
    };

    {
        let mut pb = compiler.program.borrow_mut();
        let void = pb.type_void();
        pb.create_public_function("compute", void, &[]);
    }

    let root = compiler.tree.root();
    compiler.produce(root)?;

    compiler.program.borrow_mut().ret_void();
    Ok(())
}

impl<'p, B: ProgramBuilder> PipelineCompiler<'p, B> {
    // ---- produce/consume dispatch -------------------------------------

    fn produce(&mut self, id: TranslatorId) -> Result<(), TranslateError> {
        let op = self.tree.node(id).op;
        match op {
            Operator::Scan { table, schema, .. } => {
                let info = self.catalog.table(*table).clone();
                self.produce_scan(id, &info, &schema.clone())
            }
            Operator::Select { .. } | Operator::Output { .. } => {
                let child = self.tree.node(id).children[0];
                self.produce(child)
            }
            Operator::CrossProduct { .. } => self.produce_cross_product(id),
            Operator::HashJoin { .. } => self.produce_hash_join(id),
            Operator::GroupByAggregate { .. } => self.produce_group_by(id),
            Operator::OrderBy { .. } => self.produce_order_by(id),
        }
    }

    fn consume(
        &mut self,
        id: TranslatorId,
        from: TranslatorId,
        values: SchemaValues<B>,
    ) -> Result<(), TranslateError> {
        let op = self.tree.node(id).op;
        match op {
            Operator::Select { predicate, .. } => {
                let predicate = predicate.clone();
                self.consume_select(id, &predicate, values)
            }
            Operator::Output { .. } => self.consume_output(&values),
            Operator::CrossProduct { .. } => self.consume_cross_product(id, values),
            Operator::HashJoin { .. } => self.consume_hash_join(id, values),
            Operator::GroupByAggregate { .. } => self.consume_group_by(id, values),
            Operator::OrderBy { .. } => self.consume_order_by(id, values),
            Operator::Scan { .. } => {
                let _ = from;
                Err(TranslateError::UnsupportedOperator(
                    "SCAN cannot consume tuples".to_string(),
                ))
            }
        }
    }

    fn consume_parent(
        &mut self,
        id: TranslatorId,
        values: SchemaValues<B>,
    ) -> Result<(), TranslateError> {
        match self.tree.node(id).parent {
            Some(parent) => self.consume(parent, id, values),
            None => Ok(()),
        }
    }

    // ---- Scan ---------------------------------------------------------

    fn produce_scan(
        &mut self,
        id: TranslatorId,
        info: &TableInfo,
        schema: &Schema,
    ) -> Result<(), TranslateError> {
        enum Access<B: ProgramBuilder> {
            Numeric(B::Value),
            Text(B::Value),
        }

        let mut cols: Vec<(Access<B>, ScalarType)> = Vec::with_capacity(info.columns.len());
        let mut row_count = None;
        {
            let mut pb = self.program.borrow_mut();
            for col in &info.columns {
                let path = pb.string_constant(&col.path.to_string_lossy());
                if col.ty == ScalarType::Text {
                    let offsets = col
                        .offsets_path
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let offsets = pb.string_constant(&offsets);
                    let open = abi::declare(&mut *pb, &abi::OPEN_STR);
                    let handle = pb.call(open, &[path, offsets]);
                    if row_count.is_none() {
                        let len_fn = abi::declare(&mut *pb, &abi::STR_COL_LEN);
                        row_count = Some(pb.call(len_fn, &[handle]));
                    }
                    cols.push((Access::Text(handle), col.ty));
                } else {
                    let open = abi::declare(&mut *pb, open_fn(col.ty));
                    let ui32 = pb.type_ui32();
                    let len_slot = pb.alloca(ui32);
                    let base = pb.call(open, &[path, len_slot]);
                    if row_count.is_none() {
                        row_count = Some(pb.load(len_slot));
                    }
                    cols.push((Access::Numeric(base), col.ty));
                }
            }
        }

        let Some(len) = row_count else {
            return Err(TranslateError::UnsupportedOperator(
                "SCAN of a relation with no columns".to_string(),
            ));
        };

        let lp = self.counted_loop_begin(len);

        let mut values = SchemaValues::new();
        for ((access, ty), (name, _)) in cols.iter().zip(&schema.columns) {
            match access {
                Access::Numeric(base) => {
                    let raw = {
                        let mut pb = self.program.borrow_mut();
                        let elem = pb.get_element_ptr(*base, &[GepIndex::Element(lp.idx)]);
                        pb.load(elem)
                    };
                    values.add_value(name, *ty, self.proxy_from_raw(*ty, raw));
                }
                Access::Text(handle) => {
                    let record = {
                        let mut pb = self.program.borrow_mut();
                        let record_ty = abi::string_struct_type(&mut *pb);
                        let record = pb.alloca(record_ty);
                        let get = abi::declare(&mut *pb, &abi::STR_COL_GET);
                        pb.call(get, &[*handle, lp.idx, record]);
                        record
                    };
                    values.add_value(
                        name,
                        *ty,
                        ProxyValue::Str(Str::new(Rc::clone(&self.program), record)),
                    );
                }
            }
        }

        self.consume_parent(id, values)?;
        self.counted_loop_end(lp);
        Ok(())
    }

    // ---- Select -------------------------------------------------------

    fn consume_select(
        &mut self,
        id: TranslatorId,
        predicate: &crate::plan::Expr,
        values: SchemaValues<B>,
    ) -> Result<(), TranslateError> {
        let cond = eval_expr(&self.program, predicate, &values)?
            .into_bool()
            .ok_or_else(|| {
                TranslateError::UnsupportedOperator("non-boolean SELECT predicate".to_string())
            })?;

        let end = self.guard_begin(&cond);
        self.consume_parent(id, values)?;
        self.guard_end(end);
        Ok(())
    }

    // ---- Output -------------------------------------------------------

    fn consume_output(&mut self, values: &SchemaValues<B>) -> Result<(), TranslateError> {
        let mut pb = self.program.borrow_mut();
        for value in values.values() {
            let print = match value.ty {
                ScalarType::Bool | ScalarType::I8 => &abi::PRINT_I8,
                ScalarType::I16 => &abi::PRINT_I16,
                ScalarType::I32 => &abi::PRINT_I32,
                ScalarType::I64 | ScalarType::Date => &abi::PRINT_I64,
                ScalarType::F64 => &abi::PRINT_F64,
                ScalarType::Text => &abi::PRINT_STR,
            };
            let print = abi::declare(&mut *pb, print);
            pb.call(print, &[value.value.value()]);
        }
        let newline = abi::declare(&mut *pb, &abi::PRINT_NEWLINE);
        pb.call(newline, &[]);
        Ok(())
    }

    // ---- CrossProduct -------------------------------------------------

    fn produce_cross_product(&mut self, id: TranslatorId) -> Result<(), TranslateError> {
        let (left, right) = {
            let node = self.tree.node(id);
            (node.children[0], node.children[1])
        };
        let left_schema = self.tree.node(left).op.schema().clone();

        let (buffer, tuple_ty) = self.create_tuple_buffer(&left_schema);
        self.state[id.0] = OpState::Cross {
            buffer,
            tuple_ty,
            right_phase: false,
        };

        self.produce(left)?;

        if let OpState::Cross { right_phase, .. } = &mut self.state[id.0] {
            *right_phase = true;
        }
        self.produce(right)
    }

    fn consume_cross_product(
        &mut self,
        id: TranslatorId,
        values: SchemaValues<B>,
    ) -> Result<(), TranslateError> {
        let OpState::Cross {
            buffer,
            tuple_ty,
            right_phase,
        } = self.state[id.0].extract_cross()
        else {
            unreachable!()
        };

        if !right_phase {
            // Build side: materialize the left tuple.
            let slot = self.append_tuple_slot(buffer, tuple_ty);
            self.store_tuple(slot, &values);
            return Ok(());
        }

        // Probe side: join every buffered left tuple with the incoming one.
        let left = self.tree.node(id).children[0];
        let left_schema = self.tree.node(left).op.schema().clone();

        let len = {
            let mut pb = self.program.borrow_mut();
            let len_fn = abi::declare(&mut *pb, &abi::VEC_LEN);
            pb.call(len_fn, &[buffer])
        };
        let lp = self.counted_loop_begin(len);

        let slot = {
            let mut pb = self.program.borrow_mut();
            let get = abi::declare(&mut *pb, &abi::VEC_GET);
            let raw = pb.call(get, &[buffer, lp.idx]);
            let ptr_ty = pb.type_pointer(tuple_ty);
            pb.pointer_cast(raw, ptr_ty)
        };
        let left_values = self.load_tuple(slot, &left_schema);

        let mut merged = SchemaValues::new();
        for v in left_values.values() {
            merged.add_value(&v.name, v.ty, v.value.clone());
        }
        for v in values.values() {
            merged.add_value(&v.name, v.ty, v.value.clone());
        }

        self.consume_parent(id, merged)?;
        self.counted_loop_end(lp);
        Ok(())
    }

    // ---- HashJoin -----------------------------------------------------

    fn produce_hash_join(&mut self, id: TranslatorId) -> Result<(), TranslateError> {
        let (build, probe) = {
            let node = self.tree.node(id);
            (node.children[0], node.children[1])
        };
        let build_schema = self.tree.node(build).op.schema().clone();

        let payload_ty = self.tuple_struct(&build_schema);
        let table = {
            let mut pb = self.program.borrow_mut();
            let size = pb.size_of(payload_ty);
            let create = abi::declare(&mut *pb, &abi::HT_CREATE);
            pb.call(create, &[size])
        };
        self.state[id.0] = OpState::Join {
            table,
            payload_ty,
            probing: false,
        };

        self.produce(build)?;

        if let OpState::Join { probing, .. } = &mut self.state[id.0] {
            *probing = true;
        }
        self.produce(probe)
    }

    fn consume_hash_join(
        &mut self,
        id: TranslatorId,
        values: SchemaValues<B>,
    ) -> Result<(), TranslateError> {
        let OpState::Join {
            table,
            payload_ty,
            probing,
        } = self.state[id.0].extract_join()
        else {
            unreachable!()
        };

        let Operator::HashJoin {
            left_keys,
            right_keys,
            projection,
            schema,
            ..
        } = self.tree.node(id).op
        else {
            unreachable!()
        };
        let left_keys = left_keys.clone();
        let right_keys = right_keys.clone();
        let projection = projection.clone();
        let out_schema = schema.clone();

        if !probing {
            // Build phase: hash the build key, insert (key, payload).
            let key_values: Vec<NamedValue<B>> =
                left_keys.iter().map(|&i| values.get(i).clone()).collect();
            let hash = self.hash_values(&key_values);

            let slot = {
                let mut pb = self.program.borrow_mut();
                let insert = abi::declare(&mut *pb, &abi::HT_INSERT);
                let raw = pb.call(insert, &[table, hash]);
                let ptr_ty = pb.type_pointer(payload_ty);
                pb.pointer_cast(raw, ptr_ty)
            };
            self.store_tuple(slot, &values);
            return Ok(());
        }

        // Probe phase.
        let build = self.tree.node(id).children[0];
        let build_schema = self.tree.node(build).op.schema().clone();

        let probe_keys: Vec<NamedValue<B>> =
            right_keys.iter().map(|&i| values.get(i).clone()).collect();
        let hash = self.hash_values(&probe_keys);

        let first = {
            let mut pb = self.program.borrow_mut();
            let probe = abi::declare(&mut *pb, &abi::HT_PROBE_FIRST);
            pb.call(probe, &[table, hash])
        };
        let lp = self.chain_loop_begin(first);

        let payload = {
            let mut pb = self.program.borrow_mut();
            let ptr_ty = pb.type_pointer(payload_ty);
            pb.pointer_cast(lp.entry, ptr_ty)
        };
        let build_values = self.load_tuple(payload, &build_schema);

        // Hash buckets chain by hash value only; re-check the keys.
        let stored_keys: Vec<NamedValue<B>> = left_keys
            .iter()
            .map(|&i| build_values.get(i).clone())
            .collect();
        let matches = self.keys_match(&stored_keys, &probe_keys);

        let end = self.guard_begin(&matches);
        let mut merged = SchemaValues::new();
        for ((side, idx), (name, ty)) in projection.iter().zip(&out_schema.columns) {
            let source = match side {
                Side::Left => build_values.get(*idx),
                Side::Right => values.get(*idx),
            };
            merged.add_value(name, *ty, source.value.clone());
        }
        self.consume_parent(id, merged)?;
        self.guard_end(end);

        self.chain_loop_end(lp, &abi::HT_PROBE_NEXT);
        Ok(())
    }

    // ---- GroupByAggregate ---------------------------------------------

    fn produce_group_by(&mut self, id: TranslatorId) -> Result<(), TranslateError> {
        let child = self.tree.node(id).children[0];
        let child_schema = self.tree.node(child).op.schema().clone();
        let Operator::GroupByAggregate {
            group_keys,
            aggregates,
            schema,
            ..
        } = self.tree.node(id).op
        else {
            unreachable!()
        };
        let group_keys = group_keys.clone();
        let aggregates = aggregates.clone();
        let out_schema = schema.clone();

        let (payload_ty, agg_starts) =
            self.group_payload(&child_schema, &group_keys, &aggregates)?;
        let table = {
            let mut pb = self.program.borrow_mut();
            let size = pb.size_of(payload_ty);
            let create = abi::declare(&mut *pb, &abi::HT_CREATE);
            pb.call(create, &[size])
        };
        self.state[id.0] = OpState::Group { table, payload_ty };

        self.produce(child)?;

        // Scan phase: walk the table, finalize each group's aggregates.
        let first = {
            let mut pb = self.program.borrow_mut();
            let scan = abi::declare(&mut *pb, &abi::HT_SCAN_FIRST);
            pb.call(scan, &[table])
        };
        let lp = self.chain_loop_begin(first);

        let payload = {
            let mut pb = self.program.borrow_mut();
            let ptr_ty = pb.type_pointer(payload_ty);
            pb.pointer_cast(lp.entry, ptr_ty)
        };

        let mut out = SchemaValues::new();
        for (i, &key_idx) in group_keys.iter().enumerate() {
            let ty = child_schema.columns[key_idx].1;
            let (name, _) = &out_schema.columns[i];
            let proxy = self.load_field(payload, i as u32, ty);
            out.add_value(name, ty, proxy);
        }

        for (j, slot) in aggregates.iter().enumerate() {
            let start = agg_starts[j];
            let (name, result_ty) = &out_schema.columns[group_keys.len() + j];
            let proxy = match slot.func {
                AggregateFunc::Avg => {
                    let sum = self.load_field(payload, start, ScalarType::F64);
                    let count = self.load_field(payload, start + 1, ScalarType::I64);
                    let mut pb = self.program.borrow_mut();
                    let count_f =
                        pb.cast(ScalarKind::I64, ScalarKind::F64, count.value());
                    let avg = pb.div(ScalarKind::F64, sum.value(), count_f);
                    drop(pb);
                    ProxyValue::F64(Float64::new(Rc::clone(&self.program), avg))
                }
                _ => self.load_field(payload, start, *result_ty),
            };
            out.add_value(name, *result_ty, proxy);
        }

        self.consume_parent(id, out)?;
        self.chain_loop_end(lp, &abi::HT_SCAN_NEXT);
        Ok(())
    }

    fn consume_group_by(
        &mut self,
        id: TranslatorId,
        values: SchemaValues<B>,
    ) -> Result<(), TranslateError> {
        let OpState::Group { table, payload_ty } = self.state[id.0].extract_group() else {
            unreachable!()
        };
        let Operator::GroupByAggregate {
            group_keys,
            aggregates,
            ..
        } = self.tree.node(id).op
        else {
            unreachable!()
        };
        let group_keys = group_keys.clone();
        let aggregates = aggregates.clone();

        let child = self.tree.node(id).children[0];
        let child_schema = self.tree.node(child).op.schema().clone();
        let (_, agg_starts) = self.group_payload(&child_schema, &group_keys, &aggregates)?;

        let keys: Vec<NamedValue<B>> =
            group_keys.iter().map(|&i| values.get(i).clone()).collect();
        let hash = self.hash_values(&keys);

        // Aggregate arguments are evaluated once per input tuple, before any
        // branching.
        let mut args: Vec<Option<(ProxyValue<B>, ScalarType)>> = Vec::new();
        for slot in &aggregates {
            match &slot.arg {
                Some(expr) => {
                    let ty = expr_type(expr, &child_schema)?;
                    let value = eval_expr(&self.program, expr, &values)?;
                    args.push(Some((value, ty)));
                }
                None => args.push(None),
            }
        }

        let found_slot = {
            let mut pb = self.program.borrow_mut();
            let i8t = pb.type_i8();
            let slot = pb.alloca(i8t);
            let zero = pb.const_i8(0);
            pb.store(slot, zero);
            slot
        };

        let first = {
            let mut pb = self.program.borrow_mut();
            let probe = abi::declare(&mut *pb, &abi::HT_PROBE_FIRST);
            pb.call(probe, &[table, hash])
        };
        let lp = self.chain_loop_begin(first);

        let payload = {
            let mut pb = self.program.borrow_mut();
            let ptr_ty = pb.type_pointer(payload_ty);
            pb.pointer_cast(lp.entry, ptr_ty)
        };
        let stored_keys: Vec<NamedValue<B>> = group_keys
            .iter()
            .enumerate()
            .map(|(i, &key_idx)| {
                let ty = child_schema.columns[key_idx].1;
                NamedValue {
                    name: child_schema.columns[key_idx].0.clone(),
                    ty,
                    value: self.load_field(payload, i as u32, ty),
                }
            })
            .collect();
        let matches = self.keys_match(&stored_keys, &keys);

        let end = self.guard_begin(&matches);
        for (j, slot) in aggregates.iter().enumerate() {
            self.update_aggregate(payload, agg_starts[j], slot, args[j].as_ref());
        }
        {
            let mut pb = self.program.borrow_mut();
            let one = pb.const_i8(1);
            pb.store(found_slot, one);
        }
        self.guard_end(end);

        self.chain_loop_end(lp, &abi::HT_PROBE_NEXT);

        // No matching group: insert a fresh entry.
        let not_found = {
            let mut pb = self.program.borrow_mut();
            let found = pb.load(found_slot);
            let inverted = pb.lnot(found);
            Bool::new(Rc::clone(&self.program), inverted)
        };
        let end = self.guard_begin(&not_found);

        let payload = {
            let mut pb = self.program.borrow_mut();
            let insert = abi::declare(&mut *pb, &abi::HT_INSERT);
            let raw = pb.call(insert, &[table, hash]);
            let ptr_ty = pb.type_pointer(payload_ty);
            pb.pointer_cast(raw, ptr_ty)
        };
        for (i, key) in keys.iter().enumerate() {
            self.store_field(payload, i as u32, key);
        }
        for (j, slot) in aggregates.iter().enumerate() {
            self.init_aggregate(payload, agg_starts[j], slot, args[j].as_ref());
        }
        self.guard_end(end);
        Ok(())
    }

    /// Payload layout for a group: key fields first, then the state slots of
    /// each aggregate (AVG takes a running f64 sum plus an i64 count).
    fn group_payload(
        &self,
        child_schema: &Schema,
        group_keys: &[usize],
        aggregates: &[AggregateSlot],
    ) -> Result<(B::Type, Vec<u32>), TranslateError> {
        let mut fields: Vec<B::Type> = group_keys
            .iter()
            .map(|&i| self.member_type(child_schema.columns[i].1))
            .collect();

        let mut starts = Vec::with_capacity(aggregates.len());
        for slot in aggregates {
            starts.push(fields.len() as u32);
            let arg_ty = match &slot.arg {
                Some(expr) => Some(expr_type(expr, child_schema)?),
                None => None,
            };
            match slot.func {
                AggregateFunc::Count => fields.push(self.member_type(ScalarType::I64)),
                AggregateFunc::Sum => {
                    let state = aggregate_result_type(slot.func, arg_ty)?;
                    fields.push(self.member_type(state));
                }
                AggregateFunc::Min | AggregateFunc::Max => {
                    let state = arg_ty.unwrap_or(ScalarType::I64);
                    fields.push(self.member_type(state));
                }
                AggregateFunc::Avg => {
                    fields.push(self.member_type(ScalarType::F64));
                    fields.push(self.member_type(ScalarType::I64));
                }
            }
        }

        let payload = self.program.borrow_mut().type_struct(&fields);
        Ok((payload, starts))
    }

    /// Fold one input value into an existing group's state slots.
    fn update_aggregate(
        &self,
        payload: B::Value,
        start: u32,
        slot: &AggregateSlot,
        arg: Option<&(ProxyValue<B>, ScalarType)>,
    ) {
        let mut pb = self.program.borrow_mut();
        match slot.func {
            AggregateFunc::Count => {
                let ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start)]);
                let cur = pb.load(ptr);
                let one = pb.const_i64(1);
                let next = pb.add(ScalarKind::I64, cur, one);
                pb.store(ptr, next);
            }
            AggregateFunc::Sum => {
                let Some((value, ty)) = arg else { return };
                let ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start)]);
                let cur = pb.load(ptr);
                let (kind, incoming) = widen_for_sum(&mut *pb, value, *ty);
                let next = pb.add(kind, cur, incoming);
                pb.store(ptr, next);
            }
            AggregateFunc::Avg => {
                let Some((value, ty)) = arg else { return };
                let sum_ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start)]);
                let sum = pb.load(sum_ptr);
                let incoming = widen_to_f64(&mut *pb, value, *ty);
                let next = pb.add(ScalarKind::F64, sum, incoming);
                pb.store(sum_ptr, next);

                let count_ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start + 1)]);
                let count = pb.load(count_ptr);
                let one = pb.const_i64(1);
                let next = pb.add(ScalarKind::I64, count, one);
                pb.store(count_ptr, next);
            }
            AggregateFunc::Min | AggregateFunc::Max => {
                let Some((value, ty)) = arg else { return };
                let ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start)]);
                let cur = pb.load(ptr);
                let pred = if slot.func == AggregateFunc::Min {
                    Cmp::Lt
                } else {
                    Cmp::Gt
                };
                let replace = pb.cmp(pred, member_kind(*ty), value.value(), cur);
                drop(pb);

                let replace = Bool::new(Rc::clone(&self.program), replace);
                let raw = value.value();
                let program = Rc::clone(&self.program);
                control::if_then(&self.program, &replace, move || {
                    program.borrow_mut().store(ptr, raw);
                });
            }
        }
    }

    /// Initialize state slots for a freshly inserted group.
    fn init_aggregate(
        &self,
        payload: B::Value,
        start: u32,
        slot: &AggregateSlot,
        arg: Option<&(ProxyValue<B>, ScalarType)>,
    ) {
        let mut pb = self.program.borrow_mut();
        match slot.func {
            AggregateFunc::Count => {
                let ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start)]);
                let one = pb.const_i64(1);
                pb.store(ptr, one);
            }
            AggregateFunc::Sum => {
                let Some((value, ty)) = arg else { return };
                let ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start)]);
                let (_, incoming) = widen_for_sum(&mut *pb, value, *ty);
                pb.store(ptr, incoming);
            }
            AggregateFunc::Avg => {
                let Some((value, ty)) = arg else { return };
                let sum_ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start)]);
                let incoming = widen_to_f64(&mut *pb, value, *ty);
                pb.store(sum_ptr, incoming);

                let count_ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start + 1)]);
                let one = pb.const_i64(1);
                pb.store(count_ptr, one);
            }
            AggregateFunc::Min | AggregateFunc::Max => {
                let Some((value, _)) = arg else { return };
                let ptr = pb.get_element_ptr(payload, &[GepIndex::Field(start)]);
                pb.store(ptr, value.value());
            }
        }
    }

    // ---- OrderBy ------------------------------------------------------

    fn produce_order_by(&mut self, id: TranslatorId) -> Result<(), TranslateError> {
        let child = self.tree.node(id).children[0];
        let child_schema = self.tree.node(child).op.schema().clone();
        let Operator::OrderBy { keys, .. } = self.tree.node(id).op else {
            unreachable!()
        };
        let keys = keys.clone();

        let (buffer, tuple_ty) = self.create_tuple_buffer(&child_schema);
        self.state[id.0] = OpState::Order { buffer, tuple_ty };

        self.produce(child)?;

        // Sort with a generated comparator, then scan in order.
        let cmp_fn = self.emit_comparator(tuple_ty, &child_schema, &keys);
        {
            let mut pb = self.program.borrow_mut();
            let fp = pb.function_pointer(cmp_fn);
            let sort = abi::declare(&mut *pb, &abi::VEC_SORT);
            pb.call(sort, &[buffer, fp]);
        }

        let len = {
            let mut pb = self.program.borrow_mut();
            let len_fn = abi::declare(&mut *pb, &abi::VEC_LEN);
            pb.call(len_fn, &[buffer])
        };
        let lp = self.counted_loop_begin(len);

        let slot = {
            let mut pb = self.program.borrow_mut();
            let get = abi::declare(&mut *pb, &abi::VEC_GET);
            let raw = pb.call(get, &[buffer, lp.idx]);
            let ptr_ty = pb.type_pointer(tuple_ty);
            pb.pointer_cast(raw, ptr_ty)
        };
        let out = self.load_tuple(slot, &child_schema);

        self.consume_parent(id, out)?;
        self.counted_loop_end(lp);
        Ok(())
    }

    fn consume_order_by(
        &mut self,
        id: TranslatorId,
        values: SchemaValues<B>,
    ) -> Result<(), TranslateError> {
        let OpState::Order { buffer, tuple_ty } = self.state[id.0].extract_order() else {
            unreachable!()
        };
        let slot = self.append_tuple_slot(buffer, tuple_ty);
        self.store_tuple(slot, &values);
        Ok(())
    }

    /// Generate the less-than comparator the runtime sort calls back into:
    /// `i8 cmp(i8* a, i8* b)` returning 1 when `a` orders before `b`.
    fn emit_comparator(
        &mut self,
        tuple_ty: B::Type,
        schema: &Schema,
        keys: &[(usize, crate::plan::Direction)],
    ) -> B::Function {
        use crate::plan::Direction;

        let mut pb = self.program.borrow_mut();
        let saved = pb.current_block();

        let i8t = pb.type_i8();
        let byte_ptr = pb.type_pointer(i8t);
        let cmp_fn = pb.create_function(i8t, &[byte_ptr, byte_ptr]);
        let params = pb.function_arguments(cmp_fn);

        let ptr_ty = pb.type_pointer(tuple_ty);
        let a = pb.pointer_cast(params[0], ptr_ty);
        let b = pb.pointer_cast(params[1], ptr_ty);

        for &(key_idx, dir) in keys {
            let ty = schema.columns[key_idx].1;
            let kind = member_kind(ty);

            let a_ptr = pb.get_element_ptr(a, &[GepIndex::Field(key_idx as u32)]);
            let a_key = pb.load(a_ptr);
            let b_ptr = pb.get_element_ptr(b, &[GepIndex::Field(key_idx as u32)]);
            let b_key = pb.load(b_ptr);

            let (before, after) = match dir {
                Direction::Ascending => (Cmp::Lt, Cmp::Gt),
                Direction::Descending => (Cmp::Gt, Cmp::Lt),
            };
            let orders_before = pb.cmp(before, kind, a_key, b_key);
            let orders_after = pb.cmp(after, kind, a_key, b_key);

            let ret_before = pb.generate_block();
            let check_after = pb.generate_block();
            pb.cond_branch(orders_before, ret_before, check_after);

            pb.set_current_block(ret_before);
            let one = pb.const_i8(1);
            pb.ret(one);

            pb.set_current_block(check_after);
            let ret_after = pb.generate_block();
            let next_key = pb.generate_block();
            pb.cond_branch(orders_after, ret_after, next_key);

            pb.set_current_block(ret_after);
            let zero = pb.const_i8(0);
            pb.ret(zero);

            pb.set_current_block(next_key);
        }

        // All keys equal.
        let zero = pb.const_i8(0);
        pb.ret(zero);

        pb.set_current_block(saved);
        cmp_fn
    }

    // ---- shared emission helpers --------------------------------------

    fn member_type(&self, ty: ScalarType) -> B::Type {
        let mut pb = self.program.borrow_mut();
        match ty {
            ScalarType::Bool | ScalarType::I8 => pb.type_i8(),
            ScalarType::I16 => pb.type_i16(),
            ScalarType::I32 => pb.type_i32(),
            ScalarType::I64 | ScalarType::Date => pb.type_i64(),
            ScalarType::F64 => pb.type_f64(),
            ScalarType::Text => abi::string_struct_type(&mut *pb),
        }
    }

    fn tuple_struct(&self, schema: &Schema) -> B::Type {
        let fields: Vec<B::Type> = schema
            .columns
            .iter()
            .map(|(_, ty)| self.member_type(*ty))
            .collect();
        self.program.borrow_mut().type_struct(&fields)
    }

    fn create_tuple_buffer(&self, schema: &Schema) -> (B::Value, B::Type) {
        let tuple_ty = self.tuple_struct(schema);
        let mut pb = self.program.borrow_mut();
        let size = pb.size_of(tuple_ty);
        let create = abi::declare(&mut *pb, &abi::VEC_CREATE);
        let buffer = pb.call(create, &[size]);
        (buffer, tuple_ty)
    }

    fn append_tuple_slot(&self, buffer: B::Value, tuple_ty: B::Type) -> B::Value {
        let mut pb = self.program.borrow_mut();
        let append = abi::declare(&mut *pb, &abi::VEC_APPEND);
        let raw = pb.call(append, &[buffer]);
        let ptr_ty = pb.type_pointer(tuple_ty);
        pb.pointer_cast(raw, ptr_ty)
    }

    /// Store the tuple's columns into a struct slot, field by field.
    fn store_tuple(&self, slot: B::Value, values: &SchemaValues<B>) {
        for (i, value) in values.values().iter().enumerate() {
            self.store_field(slot, i as u32, value);
        }
    }

    fn store_field(&self, slot: B::Value, field: u32, value: &NamedValue<B>) {
        if let ProxyValue::Str(s) = &value.value {
            let field_ptr = self
                .program
                .borrow_mut()
                .get_element_ptr(slot, &[GepIndex::Field(field)]);
            s.copy_into(field_ptr);
        } else {
            let mut pb = self.program.borrow_mut();
            let field_ptr = pb.get_element_ptr(slot, &[GepIndex::Field(field)]);
            pb.store(field_ptr, value.value.value());
        }
    }

    /// Load a whole tuple back out of a struct slot.
    fn load_tuple(&self, slot: B::Value, schema: &Schema) -> SchemaValues<B> {
        let mut out = SchemaValues::new();
        for (i, (name, ty)) in schema.columns.iter().enumerate() {
            let proxy = self.load_field(slot, i as u32, *ty);
            out.add_value(name, *ty, proxy);
        }
        out
    }

    fn load_field(&self, slot: B::Value, field: u32, ty: ScalarType) -> ProxyValue<B> {
        let mut pb = self.program.borrow_mut();
        let field_ptr = pb.get_element_ptr(slot, &[GepIndex::Field(field)]);
        if ty == ScalarType::Text {
            drop(pb);
            return ProxyValue::Str(Str::new(Rc::clone(&self.program), field_ptr));
        }
        let raw = pb.load(field_ptr);
        drop(pb);
        self.proxy_from_raw(ty, raw)
    }

    fn proxy_from_raw(&self, ty: ScalarType, raw: B::Value) -> ProxyValue<B> {
        let p = Rc::clone(&self.program);
        match ty {
            ScalarType::Bool => ProxyValue::Bool(Bool::new(p, raw)),
            ScalarType::I8 => ProxyValue::I8(Int8::new(p, raw)),
            ScalarType::I16 => ProxyValue::I16(Int16::new(p, raw)),
            ScalarType::I32 => ProxyValue::I32(Int32::new(p, raw)),
            ScalarType::I64 | ScalarType::Date => ProxyValue::I64(Int64::new(p, raw)),
            ScalarType::F64 => ProxyValue::F64(Float64::new(p, raw)),
            ScalarType::Text => ProxyValue::Str(Str::new(p, raw)),
        }
    }

    /// Chain the per-type hash helpers over the key columns, seed 0.
    fn hash_values(&self, keys: &[NamedValue<B>]) -> B::Value {
        let mut pb = self.program.borrow_mut();
        let mut hash = pb.const_i64(0);
        for key in keys {
            let hasher = match key.ty {
                ScalarType::Bool | ScalarType::I8 => &abi::HASH_I8,
                ScalarType::I16 => &abi::HASH_I16,
                ScalarType::I32 => &abi::HASH_I32,
                ScalarType::I64 | ScalarType::Date => &abi::HASH_I64,
                ScalarType::F64 => &abi::HASH_F64,
                ScalarType::Text => &abi::HASH_STR,
            };
            let hasher = abi::declare(&mut *pb, hasher);
            hash = pb.call(hasher, &[hash, key.value.value()]);
        }
        hash
    }

    fn values_equal(&self, a: &NamedValue<B>, b: &NamedValue<B>) -> Bool<B> {
        match (&a.value, &b.value) {
            (ProxyValue::I8(x), ProxyValue::I8(y)) => x.eq(y),
            (ProxyValue::I16(x), ProxyValue::I16(y)) => x.eq(y),
            (ProxyValue::I32(x), ProxyValue::I32(y)) => x.eq(y),
            (ProxyValue::I64(x), ProxyValue::I64(y)) => x.eq(y),
            (ProxyValue::F64(x), ProxyValue::F64(y)) => x.eq(y),
            (ProxyValue::Str(x), ProxyValue::Str(y)) => x.eq(y),
            (ProxyValue::Bool(x), ProxyValue::Bool(y)) => x.eq(y),
            _ => Bool::constant(Rc::clone(&self.program), false),
        }
    }

    fn keys_match(&self, a: &[NamedValue<B>], b: &[NamedValue<B>]) -> Bool<B> {
        let mut result: Option<Bool<B>> = None;
        for (x, y) in a.iter().zip(b) {
            let eq = self.values_equal(x, y);
            result = Some(match result {
                Some(acc) => &acc & &eq,
                None => eq,
            });
        }
        result.unwrap_or_else(|| Bool::constant(Rc::clone(&self.program), true))
    }

    // ---- block-structure helpers --------------------------------------

    /// Open an `if (cond)` region; returns the merge block for `guard_end`.
    fn guard_begin(&self, cond: &Bool<B>) -> B::Block {
        let mut pb = self.program.borrow_mut();
        let then_block = pb.generate_block();
        let end_block = pb.generate_block();
        pb.cond_branch(cond.value(), then_block, end_block);
        pb.set_current_block(then_block);
        end_block
    }

    fn guard_end(&self, end: B::Block) {
        let mut pb = self.program.borrow_mut();
        pb.branch(end);
        pb.set_current_block(end);
    }

    /// Open a `for (i = 0; i < len; i++)` loop; leaves the current block in
    /// the body with the index loaded.
    fn counted_loop_begin(&self, len: B::Value) -> CountedLoop<B> {
        let mut pb = self.program.borrow_mut();
        let ui32 = pb.type_ui32();
        let idx_slot = pb.alloca(ui32);
        let zero = pb.const_ui32(0);
        pb.store(idx_slot, zero);

        let header = pb.generate_block();
        pb.branch(header);
        pb.set_current_block(header);

        let idx = pb.load(idx_slot);
        let in_range = pb.cmp(Cmp::Lt, ScalarKind::UI32, idx, len);
        let body = pb.generate_block();
        let end = pb.generate_block();
        pb.cond_branch(in_range, body, end);
        pb.set_current_block(body);

        // The body re-reads the slot so the value is local to the body block.
        let idx = pb.load(idx_slot);
        CountedLoop {
            idx_slot,
            header,
            end,
            idx,
        }
    }

    fn counted_loop_end(&self, lp: CountedLoop<B>) {
        let mut pb = self.program.borrow_mut();
        let idx = pb.load(lp.idx_slot);
        let one = pb.const_ui32(1);
        let next = pb.add(ScalarKind::UI32, idx, one);
        pb.store(lp.idx_slot, next);
        pb.branch(lp.header);
        pb.set_current_block(lp.end);
    }

    /// Open a pointer-chase loop from `first`; the body sees the current
    /// entry, and `chain_loop_end` advances via `next_fn`.
    fn chain_loop_begin(&self, first: B::Value) -> ChainLoop<B> {
        let mut pb = self.program.borrow_mut();
        let i8t = pb.type_i8();
        let byte_ptr = pb.type_pointer(i8t);
        let slot = pb.alloca(byte_ptr);
        pb.store(slot, first);

        let header = pb.generate_block();
        pb.branch(header);
        pb.set_current_block(header);

        let entry = pb.load(slot);
        let null = pb.null_ptr(i8t);
        let live = pb.cmp(Cmp::Ne, ScalarKind::Ptr, entry, null);
        let body = pb.generate_block();
        let end = pb.generate_block();
        pb.cond_branch(live, body, end);
        pb.set_current_block(body);

        let entry = pb.load(slot);
        ChainLoop {
            slot,
            header,
            end,
            entry,
        }
    }

    fn chain_loop_end(&self, lp: ChainLoop<B>, next_fn: &abi::RuntimeFn) {
        let mut pb = self.program.borrow_mut();
        let entry = pb.load(lp.slot);
        let next = abi::declare(&mut *pb, next_fn);
        let next = pb.call(next, &[entry]);
        pb.store(lp.slot, next);
        pb.branch(lp.header);
        pb.set_current_block(lp.end);
    }
}

/// Scalar kind of a column as stored in generated code.
fn member_kind(ty: ScalarType) -> ScalarKind {
    match ty {
        ScalarType::Bool | ScalarType::I8 => ScalarKind::I8,
        ScalarType::I16 => ScalarKind::I16,
        ScalarType::I32 => ScalarKind::I32,
        ScalarType::I64 | ScalarType::Date => ScalarKind::I64,
        ScalarType::F64 => ScalarKind::F64,
        ScalarType::Text => ScalarKind::Ptr,
    }
}

fn open_fn(ty: ScalarType) -> &'static abi::RuntimeFn {
    match ty {
        ScalarType::I8 | ScalarType::Bool => &abi::OPEN_I8,
        ScalarType::I16 => &abi::OPEN_I16,
        ScalarType::I32 => &abi::OPEN_I32,
        ScalarType::I64 | ScalarType::Date => &abi::OPEN_I64,
        _ => &abi::OPEN_F64,
    }
}

/// Widen an integer SUM input to the i64 state slot; f64 passes through.
fn widen_for_sum<B: ProgramBuilder>(
    pb: &mut B,
    value: &ProxyValue<B>,
    ty: ScalarType,
) -> (ScalarKind, B::Value) {
    match ty {
        ScalarType::F64 => (ScalarKind::F64, value.value()),
        ScalarType::I64 | ScalarType::Date => (ScalarKind::I64, value.value()),
        _ => (
            ScalarKind::I64,
            pb.cast(member_kind(ty), ScalarKind::I64, value.value()),
        ),
    }
}

fn widen_to_f64<B: ProgramBuilder>(pb: &mut B, value: &ProxyValue<B>, ty: ScalarType) -> B::Value {
    if ty == ScalarType::F64 {
        value.value()
    } else {
        pb.cast(member_kind(ty), ScalarKind::F64, value.value())
    }
}

impl<B: ProgramBuilder> OpState<B> {
    fn extract_cross(&self) -> OpState<B> {
        match self {
            OpState::Cross {
                buffer,
                tuple_ty,
                right_phase,
            } => OpState::Cross {
                buffer: *buffer,
                tuple_ty: *tuple_ty,
                right_phase: *right_phase,
            },
            _ => OpState::None,
        }
    }

    fn extract_join(&self) -> OpState<B> {
        match self {
            OpState::Join {
                table,
                payload_ty,
                probing,
            } => OpState::Join {
                table: *table,
                payload_ty: *payload_ty,
                probing: *probing,
            },
            _ => OpState::None,
        }
    }

    fn extract_group(&self) -> OpState<B> {
        match self {
            OpState::Group { table, payload_ty } => OpState::Group {
                table: *table,
                payload_ty: *payload_ty,
            },
            _ => OpState::None,
        }
    }

    fn extract_order(&self) -> OpState<B> {
        match self {
            OpState::Order { buffer, tuple_ty } => OpState::Order {
                buffer: *buffer,
                tuple_ty: *tuple_ty,
            },
            _ => OpState::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{program_ref, SourceProgram};
    use crate::plan::{BinaryOp, Direction, Expr, PlanBuilder};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register_table(
            "test",
            vec![("col0".to_string(), ScalarType::I32, "test.skdbcol".into())],
        );
        catalog.register_table(
            "pairs",
            vec![
                ("k".to_string(), ScalarType::I64, "pairs_k.col".into()),
                ("v".to_string(), ScalarType::I32, "pairs_v.col".into()),
            ],
        );
        catalog
    }

    fn compile_to_source(catalog: &Catalog, plan: &Operator) -> String {
        let program = program_ref(SourceProgram::new());
        compile_plan(&program, catalog, plan).unwrap();
        let src = program.borrow().to_source();
        src
    }

    #[test]
    fn test_scan_select_output_shape() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("test").unwrap();
        let select = builder
            .select(
                scan,
                Expr::binary(BinaryOp::Lt, Expr::column("col0"), Expr::IntLiteral(10)),
            )
            .unwrap();
        let plan = builder.output(select).unwrap();

        let src = compile_to_source(&catalog, &plan);
        assert!(src.contains("fusedb_open_i32("));
        assert!(src.contains("\"test.skdbcol\""));
        assert!(src.contains("fusedb_print_i32("));
        assert!(src.contains("fusedb_print_newline();"));
        // One fused loop: scan drives select drives output.
        assert!(src.contains("goto b"));
    }

    #[test]
    fn test_group_by_uses_hash_table() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("pairs").unwrap();
        let agg = builder
            .group_by_aggregate(
                scan,
                &["k"],
                vec![
                    ("cnt".to_string(), AggregateFunc::Count, None),
                    (
                        "total".to_string(),
                        AggregateFunc::Sum,
                        Some(Expr::column("v")),
                    ),
                ],
            )
            .unwrap();
        let plan = builder.output(agg).unwrap();

        let src = compile_to_source(&catalog, &plan);
        assert!(src.contains("fusedb_ht_create("));
        assert!(src.contains("fusedb_hash_i64("));
        assert!(src.contains("fusedb_ht_probe_first("));
        assert!(src.contains("fusedb_ht_insert("));
        assert!(src.contains("fusedb_ht_scan_first("));
        assert!(src.contains("fusedb_ht_scan_next("));
    }

    #[test]
    fn test_order_by_generates_comparator() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("pairs").unwrap();
        let sorted = builder
            .order_by(scan, &[("v", Direction::Descending)])
            .unwrap();
        let plan = builder.output(sorted).unwrap();

        let src = compile_to_source(&catalog, &plan);
        assert!(src.contains("fusedb_vec_create("));
        assert!(src.contains("fusedb_vec_append("));
        assert!(src.contains("static int8_t fn"));
        assert!(src.contains("fusedb_vec_sort("));
        assert!(src.contains("fusedb_vec_get("));
    }

    #[test]
    fn test_hash_join_build_then_probe() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let left = builder.scan("pairs").unwrap();
        let right = builder.scan("pairs").unwrap();
        let join = builder
            .hash_join(
                left,
                right,
                &["k"],
                &["k"],
                &[(Side::Left, "v"), (Side::Right, "v")],
            )
            .unwrap();
        let plan = builder.output(join).unwrap();

        let src = compile_to_source(&catalog, &plan);
        assert!(src.contains("fusedb_ht_insert("));
        assert!(src.contains("fusedb_ht_probe_first("));
        assert!(src.contains("fusedb_ht_probe_next("));
        // Both sides of the projection print.
        assert!(src.matches("fusedb_print_i32(").count() >= 2);
    }

    #[test]
    fn test_emission_is_deterministic_for_plan() {
        let catalog = catalog();
        let make = || {
            let builder = PlanBuilder::new(&catalog);
            let scan = builder.scan("test").unwrap();
            let select = builder
                .select(
                    scan,
                    Expr::binary(BinaryOp::Lt, Expr::column("col0"), Expr::IntLiteral(10)),
                )
                .unwrap();
            let plan = builder.output(select).unwrap();
            compile_to_source(&catalog, &plan)
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn test_bitcode_backend_verifies() {
        use crate::codegen::IrProgram;
        use crate::ir::verify;

        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("pairs").unwrap();
        let agg = builder
            .group_by_aggregate(
                scan,
                &["k"],
                vec![(
                    "avg_v".to_string(),
                    AggregateFunc::Avg,
                    Some(Expr::column("v")),
                )],
            )
            .unwrap();
        let sorted = builder
            .order_by(agg, &[("avg_v", Direction::Ascending)])
            .unwrap();
        let plan = builder.output(sorted).unwrap();

        let program = program_ref(IrProgram::new());
        compile_plan(&program, &catalog, &plan).unwrap();

        let finished = Rc::try_unwrap(program)
            .ok()
            .map(|cell| cell.into_inner().finish())
            .unwrap();
        verify(&finished).unwrap();
        assert!(finished.function_by_name("compute").is_some());
    }
}
